//! Native inference engine capability
//!
//! An engine is one loaded model file. Engines are produced by an
//! [`EngineLoader`] and are only ever held by the slot table, wrapped in an
//! [`EngineHandle`]. Callers see [`SlotBinding`]s, which carry identity and
//! metadata but no way to reach the engine itself.

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::types::{EngineError, ModelRecord, Slot, TokenId};

pub mod timings;

pub use timings::{CompletionOutput, CompletionParams, CompletionTimings};

/// Operations a loaded native engine supports
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Run one generation, streaming every produced piece to `on_token` in
    /// production order
    async fn completion(
        &self,
        params: &CompletionParams,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<CompletionOutput, EngineError>;

    /// Ask an in-flight completion to halt at the next safe point
    async fn stop_completion(&self) -> Result<(), EngineError>;

    async fn tokenize(&self, text: &str) -> Result<Vec<TokenId>, EngineError>;

    async fn embedding(&self, text: &str) -> Result<Vec<f32>, EngineError>;

    /// Write the KV state to `path` and return the number of tokens saved
    async fn save_session(&self, path: &Path) -> Result<usize, EngineError>;

    async fn load_session(&self, path: &Path) -> Result<(), EngineError>;

    /// Free native memory. The engine must not be used afterwards.
    async fn release(&self) -> Result<(), EngineError>;
}

/// Constructs engines from a model file and parameters
#[async_trait]
pub trait EngineLoader: Send + Sync {
    async fn create(&self, params: &LoadParams) -> Result<Arc<dyn InferenceEngine>, EngineError>;
}

/// Map a native saved-token count to a result. Native bindings report
/// failure as a negative count.
pub fn saved_tokens_from_native(raw: i64) -> Result<usize, EngineError> {
    usize::try_from(raw)
        .map_err(|_| EngineError::Session(format!("engine reported {} tokens saved", raw)))
}

/// Everything an engine is constructed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadParams {
    pub model_path: PathBuf,
    pub context_length: u32,
    pub threads: u32,
    pub batch: u32,
    pub gpu_layers: u32,
    pub embedding: bool,
}

impl LoadParams {
    pub fn new(model_path: impl Into<PathBuf>, config: &EngineConfig, embedding: bool) -> Self {
        Self {
            model_path: model_path.into(),
            context_length: config.context_length,
            threads: config.threads,
            batch: config.batch,
            gpu_layers: config.gpu_layers,
            embedding,
        }
    }
}

/// Identity of one engine instance, unique per slot table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EngineId(pub u64);

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "engine-{}", self.0)
    }
}

/// A loaded engine plus the parameters it was built with
pub struct EngineHandle {
    id: EngineId,
    params: LoadParams,
    engine: Arc<dyn InferenceEngine>,
}

impl EngineHandle {
    pub(crate) fn new(id: EngineId, params: LoadParams, engine: Arc<dyn InferenceEngine>) -> Self {
        Self { id, params, engine }
    }

    pub fn id(&self) -> EngineId {
        self.id
    }

    /// Parameters baked in at load; later config changes are not reflected
    pub fn params(&self) -> &LoadParams {
        &self.params
    }

    pub(crate) fn engine(&self) -> &dyn InferenceEngine {
        self.engine.as_ref()
    }

    pub(crate) async fn release(&self) -> Result<(), EngineError> {
        self.engine.release().await
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("id", &self.id)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// A bound slot: which engine holds which model
#[derive(Debug)]
pub struct SlotBinding {
    pub slot: Slot,
    pub handle: EngineHandle,
    pub model: ModelRecord,
}

impl SlotBinding {
    pub fn engine_id(&self) -> EngineId {
        self.handle.id()
    }
}
