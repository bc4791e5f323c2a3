//! Core types and data structures for the local inference runtime

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod error;

pub use error::*;

/// Integer id of a model row in the catalog
pub type ModelId = i64;

/// A single token id as produced by the native tokenizer
pub type TokenId = i32;

/// The role a catalog entry was imported for.
///
/// Serialized with the same tags the catalog stores in its `model_type`
/// column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelType {
    #[serde(rename = "main_chat")]
    MainChat,
    #[serde(rename = "rag_embedding")]
    Embedding,
    #[serde(rename = "rag_reasoning")]
    RagReasoning,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::MainChat => "main_chat",
            ModelType::Embedding => "rag_embedding",
            ModelType::RagReasoning => "rag_reasoning",
        }
    }
}

impl std::fmt::Display for ModelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main_chat" => Ok(ModelType::MainChat),
            "rag_embedding" | "embedding" => Ok(ModelType::Embedding),
            "rag_reasoning" => Ok(ModelType::RagReasoning),
            other => Err(format!("unknown model type '{}'", other)),
        }
    }
}

/// One of the three fixed logical roles a loaded model can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    MainChat,
    Embedding,
    RagReasoning,
}

impl Slot {
    /// Every slot, in table order
    pub const ALL: [Slot; 3] = [Slot::MainChat, Slot::Embedding, Slot::RagReasoning];

    /// The catalog type a model must have to be bound into this slot
    pub fn expected_model_type(self) -> ModelType {
        match self {
            Slot::MainChat => ModelType::MainChat,
            Slot::Embedding => ModelType::Embedding,
            Slot::RagReasoning => ModelType::RagReasoning,
        }
    }

    /// Whether engines for this slot are created in embedding mode
    pub fn wants_embedding(self) -> bool {
        matches!(self, Slot::Embedding)
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Slot::MainChat => 0,
            Slot::Embedding => 1,
            Slot::RagReasoning => 2,
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Slot::MainChat => "main-chat",
            Slot::Embedding => "embedding",
            Slot::RagReasoning => "rag-reasoning",
        };
        f.write_str(name)
    }
}

/// Immutable snapshot of catalog metadata taken at load time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Catalog row id
    pub id: ModelId,
    /// Display name (`general.name` from the model metadata)
    pub name: String,
    /// File name on disk
    #[serde(default)]
    pub file: String,
    /// Absolute path of the weights file
    pub file_path: PathBuf,
    /// Size of the weights file in bytes
    #[serde(default)]
    pub file_size: u64,
    /// Training context length advertised by the model
    #[serde(default)]
    pub context_length: u32,
    /// Parameter size label, e.g. `1.5B`
    #[serde(default)]
    pub params: String,
    /// GGUF `general.file_type` code, if known
    #[serde(default)]
    pub quantization: Option<u32>,
    /// `general.architecture`
    #[serde(default)]
    pub architecture: String,
    /// Role this model was imported for
    pub model_type: ModelType,
}

impl ModelRecord {
    /// Minimal record, mostly useful for tests and tooling
    pub fn new(
        id: ModelId,
        name: impl Into<String>,
        file_path: impl Into<PathBuf>,
        model_type: ModelType,
    ) -> Self {
        let file_path = file_path.into();
        let file = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            id,
            name: name.into(),
            file,
            file_path,
            file_size: 0,
            context_length: 0,
            params: String::new(),
            quantization: None,
            architecture: String::new(),
            model_type,
        }
    }

    pub fn with_quantization(mut self, file_type: u32) -> Self {
        self.quantization = Some(file_type);
        self
    }

    pub fn with_file_size(mut self, bytes: u64) -> Self {
        self.file_size = bytes;
        self
    }
}

/// Token sequence baked into the last saved session file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCacheRecord {
    #[serde(default)]
    pub tokens: Vec<TokenId>,
    /// True once a session save for `tokens` succeeded
    #[serde(default)]
    pub persisted: bool,
}

/// Render a byte count the way the model manager shows it
pub fn readable_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
