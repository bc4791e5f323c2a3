//! llamaslot runtime
//!
//! Manages local inference engines for three fixed slots (main chat,
//! embedding, RAG reasoning): binding catalog models to slots, streaming
//! completions, and persisting the main chat KV cache across restarts.

pub mod completion;
pub mod config;
pub mod engine;
pub mod models;
pub mod prelude;
pub mod session;
pub mod slots;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use completion::{CompletionCoordinator, CompletionResult, SessionPersistence};
pub use config::{ConfigError, EngineConfig, RuntimeConfig};
pub use engine::{
    CompletionParams, CompletionTimings, EngineLoader, InferenceEngine, LoadParams, SlotBinding,
};
pub use models::{InMemoryModelCatalog, ModelCatalog, ModelCatalogError, SqliteModelCatalog};
pub use session::{KvVerifyResult, SessionCache, SessionInfo, SessionLoad, SessionSaveReport};
pub use slots::SlotTable;
pub use store::{EngineStateStore, PersistedEngineState};
pub use types::*;

use std::sync::Arc;

/// Wires the slot table, completion coordinator and session cache around one
/// catalog, one engine loader and one persisted state.
#[derive(Clone)]
pub struct InferenceRuntime {
    config: Arc<RuntimeConfig>,
    catalog: Arc<dyn ModelCatalog>,
    state: Arc<EngineStateStore>,
    slots: Arc<SlotTable>,
    session: Arc<SessionCache>,
    completion: Arc<CompletionCoordinator>,
}

impl InferenceRuntime {
    /// Create a runtime whose state lives in `config.state_path()`.
    ///
    /// The `[engine]` section only seeds the engine config when no state has
    /// been persisted yet.
    pub fn new(
        config: RuntimeConfig,
        catalog: Arc<dyn ModelCatalog>,
        loader: Arc<dyn EngineLoader>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        let initial = PersistedEngineState {
            config: config.engine,
            ..Default::default()
        };
        let state = Arc::new(EngineStateStore::open(config.state_path(), initial)?);
        Ok(Self::with_state(config, state, catalog, loader))
    }

    /// Create a runtime around an existing state store
    pub fn with_state(
        config: RuntimeConfig,
        state: Arc<EngineStateStore>,
        catalog: Arc<dyn ModelCatalog>,
        loader: Arc<dyn EngineLoader>,
    ) -> Self {
        let session = Arc::new(SessionCache::new(config.session_path(), Arc::clone(&state)));
        let policy =
            models::QuantizationPolicy::new(config.models.deprecated_quantizations.iter().copied());
        let slots = Arc::new(SlotTable::new(
            Arc::clone(&catalog),
            loader,
            Arc::clone(&state),
            Arc::clone(&session),
            policy,
        ));
        let completion = Arc::new(CompletionCoordinator::new(
            Arc::clone(&slots),
            Arc::clone(&session),
            config.session.persist,
        ));

        Self {
            config: Arc::new(config),
            catalog,
            state,
            slots,
            session,
            completion,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn slots(&self) -> &Arc<SlotTable> {
        &self.slots
    }

    pub fn session(&self) -> &Arc<SessionCache> {
        &self.session
    }

    pub fn completion(&self) -> &Arc<CompletionCoordinator> {
        &self.completion
    }

    pub fn state(&self) -> &Arc<EngineStateStore> {
        &self.state
    }

    /// Engine parameters the next bind will use
    pub fn engine_config(&self) -> EngineConfig {
        self.state.snapshot().config
    }

    /// Replace the engine config. Bound engines keep the parameters they were
    /// loaded with until their slot is released and rebound.
    pub async fn set_engine_config(&self, engine: EngineConfig) -> Result<(), RuntimeError> {
        engine.validate()?;
        self.state.update(|s| s.config = engine).await?;
        tracing::info!(
            "Engine config updated: context {}, threads {}, gpu layers {}, batch {}",
            engine.context_length,
            engine.threads,
            engine.gpu_layers,
            engine.batch
        );
        Ok(())
    }

    /// Model id that `bind_selected` would bind for `slot`
    pub fn selected_model(&self, slot: Slot) -> Option<ModelId> {
        let state = self.state.snapshot();
        match slot {
            Slot::MainChat => state.last_model.map(|m| m.id),
            Slot::Embedding => state.embedding_model_id,
            Slot::RagReasoning => state.rag_reasoning_model_id,
        }
    }

    /// Remember which model a slot should use, or clear the choice
    pub async fn select_model(
        &self,
        slot: Slot,
        model_id: Option<ModelId>,
    ) -> Result<(), RuntimeError> {
        let record = match model_id {
            Some(id) => {
                let model = self
                    .catalog
                    .find_by_id(id)
                    .await?
                    .ok_or(SlotError::NotFound { id })?;
                let expected = slot.expected_model_type();
                if model.model_type != expected {
                    return Err(SlotError::TypeMismatch {
                        id,
                        name: model.name,
                        slot,
                        expected,
                        found: model.model_type,
                    }
                    .into());
                }
                Some(model)
            }
            None => None,
        };

        self.state
            .update(|s| match slot {
                Slot::MainChat => s.last_model = record,
                Slot::Embedding => s.embedding_model_id = record.map(|m| m.id),
                Slot::RagReasoning => s.rag_reasoning_model_id = record.map(|m| m.id),
            })
            .await?;
        Ok(())
    }

    /// Bind whatever model is selected for `slot`
    pub async fn bind_selected(&self, slot: Slot) -> Result<Arc<SlotBinding>, SlotError> {
        let id = self
            .selected_model(slot)
            .ok_or(SlotError::NoModelSelected { slot })?;
        self.slots.bind(slot, id).await
    }

    /// Bind the last main chat model when autoload is enabled, restoring the
    /// session if persistence is on. Failures are logged and skipped.
    pub async fn autoload(&self) -> Option<Arc<SlotBinding>> {
        if !self.config.session.autoload {
            return None;
        }

        let binding = match self.bind_selected(Slot::MainChat).await {
            Ok(binding) => binding,
            Err(SlotError::NoModelSelected { .. }) => {
                tracing::info!("No previous model to autoload");
                return None;
            }
            Err(e) => {
                tracing::warn!("Autoload skipped: {}", e);
                return None;
            }
        };

        if self.completion.persist_session() {
            if let Err(e) = self.load_session().await {
                tracing::warn!("Session restore after autoload failed: {}", e);
            }
        }

        Some(binding)
    }

    /// Save the main chat session now. With a prompt, its tokens become the
    /// recorded prefix; without one the previous record is kept.
    pub async fn save_session(&self, prompt: Option<&str>) -> Result<SessionSaveReport, SlotError> {
        let slot = Slot::MainChat;
        let guard = self.slots.lock(slot).await;
        let binding = guard.bound()?;

        let tokens = match prompt {
            Some(prompt) => binding
                .handle
                .engine()
                .tokenize(prompt)
                .await
                .map_err(|source| SlotError::Engine { slot, source })?,
            None => self.session.record().tokens,
        };

        self.session.save(&binding, tokens).await
    }

    /// Restore the session file into the main chat engine
    pub async fn load_session(&self) -> Result<SessionLoad, SlotError> {
        let guard = self.slots.lock(Slot::MainChat).await;
        let binding = guard.bound()?;
        self.session.load(&binding).await
    }

    /// Release every slot
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down inference runtime");
        self.slots.release_all().await;
    }
}
