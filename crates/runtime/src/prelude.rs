//! Prelude for embedding the runtime in an application.
//!
//! ```ignore
//! use llamaslot_runtime::prelude::*;
//! ```

// Runtime and components
pub use crate::completion::{CompletionCoordinator, CompletionResult, SessionPersistence};
pub use crate::session::{KvVerifyResult, SessionCache, SessionLoad};
pub use crate::slots::SlotTable;
pub use crate::InferenceRuntime;

// Engine seam
pub use crate::engine::{
    CompletionOutput, CompletionParams, CompletionTimings, EngineLoader, InferenceEngine,
    LoadParams, SlotBinding,
};

// Catalog
pub use crate::models::{InMemoryModelCatalog, ModelCatalog, SqliteModelCatalog};

// Config and core types
pub use crate::config::{EngineConfig, RuntimeConfig};
pub use crate::types::{
    EngineError, ModelId, ModelRecord, ModelType, Slot, SlotError, TokenId,
};

#[cfg(test)]
mod tests {
    #[test]
    fn test_prelude_imports_compile() {
        use super::*;

        let _config = EngineConfig::default();
        let _params = CompletionParams::new("hello");
        assert_eq!(Slot::ALL.len(), 3);
    }
}
