//! Model catalog lookups
//!
//! The [`ModelCatalog`] trait is the read side the slot table needs: look up
//! one model by id, or list everything that was imported. Writes live on the
//! concrete stores.
//!
//! # Usage
//!
//! ```rust
//! use llamaslot_runtime::models::{InMemoryModelCatalog, ModelCatalog};
//! use llamaslot_runtime::types::{ModelRecord, ModelType};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = InMemoryModelCatalog::new();
//! catalog.insert(ModelRecord::new(1, "qwen2.5-1.5b", "/models/qwen.gguf", ModelType::MainChat));
//!
//! if let Some(model) = catalog.find_by_id(1).await? {
//!     println!("Model: {} ({})", model.name, model.model_type);
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::types::{ModelId, ModelRecord};

/// Errors that can occur when working with the model catalog
#[derive(Debug, Error)]
pub enum ModelCatalogError {
    #[error("Catalog storage error: {reason}")]
    Storage { reason: String },

    #[error("Catalog row {id} is corrupt: {reason}")]
    Corrupt { id: ModelId, reason: String },
}

/// Read access to imported models
#[async_trait]
pub trait ModelCatalog: Send + Sync {
    /// Look up a model by id. `Ok(None)` means no such row.
    async fn find_by_id(&self, id: ModelId) -> Result<Option<ModelRecord>, ModelCatalogError>;

    /// All models, ordered by id
    async fn list(&self) -> Result<Vec<ModelRecord>, ModelCatalogError>;
}

/// Catalog held entirely in memory
#[derive(Debug, Default)]
pub struct InMemoryModelCatalog {
    models: RwLock<BTreeMap<ModelId, ModelRecord>>,
}

impl InMemoryModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_models(models: impl IntoIterator<Item = ModelRecord>) -> Self {
        let catalog = Self::new();
        for model in models {
            catalog.insert(model);
        }
        catalog
    }

    /// Insert or replace the row with `model.id`
    pub fn insert(&self, model: ModelRecord) {
        self.models.write().insert(model.id, model);
    }

    pub fn remove(&self, id: ModelId) -> Option<ModelRecord> {
        self.models.write().remove(&id)
    }
}

#[async_trait]
impl ModelCatalog for InMemoryModelCatalog {
    async fn find_by_id(&self, id: ModelId) -> Result<Option<ModelRecord>, ModelCatalogError> {
        Ok(self.models.read().get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<ModelRecord>, ModelCatalogError> {
        Ok(self.models.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelType;

    #[tokio::test]
    async fn test_in_memory_lookup() {
        let catalog = InMemoryModelCatalog::with_models([
            ModelRecord::new(2, "nomic-embed", "/m/nomic.gguf", ModelType::Embedding),
            ModelRecord::new(1, "qwen", "/m/qwen.gguf", ModelType::MainChat),
        ]);

        let found = catalog.find_by_id(2).await.unwrap().unwrap();
        assert_eq!(found.name, "nomic-embed");
        assert_eq!(found.file, "nomic.gguf");
        assert!(catalog.find_by_id(7).await.unwrap().is_none());

        let ids: Vec<_> = catalog.list().await.unwrap().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_in_memory_remove() {
        let catalog = InMemoryModelCatalog::new();
        catalog.insert(ModelRecord::new(1, "qwen", "/m/qwen.gguf", ModelType::MainChat));
        assert!(catalog.remove(1).is_some());
        assert!(catalog.remove(1).is_none());
        assert!(catalog.list().await.unwrap().is_empty());
    }
}
