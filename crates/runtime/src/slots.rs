//! Slot table: which model occupies which slot
//!
//! Each slot has its own async gate. `bind`, `release` and completions on a
//! slot hold the gate, so they never overlap for the same slot while
//! different slots proceed independently. The current binding is published
//! through an `ArcSwapOption`, which keeps `get` lock-free.
//!
//! Reaching an engine without the gate (only `interrupt` does) requires the
//! slot's `live` read lock; unbinding takes it for writing, so no engine is
//! released while such a call is running.

use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::engine::{EngineHandle, EngineId, EngineLoader, LoadParams, SlotBinding};
use crate::models::{quantization_label, ModelCatalog, QuantizationPolicy};
use crate::session::SessionCache;
use crate::store::EngineStateStore;
use crate::types::{ModelId, ModelRecord, Slot, SlotError, TokenId};

#[derive(Default)]
struct SlotEntry {
    gate: Mutex<()>,
    live: RwLock<()>,
    current: ArcSwapOption<SlotBinding>,
}

/// Exclusive hold on one slot
pub(crate) struct SlotGuard<'a> {
    slot: Slot,
    entry: &'a SlotEntry,
    _permit: MutexGuard<'a, ()>,
}

impl SlotGuard<'_> {
    pub(crate) fn binding(&self) -> Option<Arc<SlotBinding>> {
        self.entry.current.load_full()
    }

    pub(crate) fn bound(&self) -> Result<Arc<SlotBinding>, SlotError> {
        self.binding()
            .ok_or(SlotError::NoModelLoaded { slot: self.slot })
    }
}

/// Owner of every loaded engine
pub struct SlotTable {
    catalog: Arc<dyn ModelCatalog>,
    loader: Arc<dyn EngineLoader>,
    state: Arc<EngineStateStore>,
    session: Arc<SessionCache>,
    policy: QuantizationPolicy,
    entries: [SlotEntry; 3],
    next_engine_id: AtomicU64,
}

impl SlotTable {
    pub fn new(
        catalog: Arc<dyn ModelCatalog>,
        loader: Arc<dyn EngineLoader>,
        state: Arc<EngineStateStore>,
        session: Arc<SessionCache>,
        policy: QuantizationPolicy,
    ) -> Self {
        Self {
            catalog,
            loader,
            state,
            session,
            policy,
            entries: Default::default(),
            next_engine_id: AtomicU64::new(1),
        }
    }

    fn entry(&self, slot: Slot) -> &SlotEntry {
        &self.entries[slot.index()]
    }

    pub(crate) async fn lock(&self, slot: Slot) -> SlotGuard<'_> {
        let entry = self.entry(slot);
        let permit = entry.gate.lock().await;
        SlotGuard {
            slot,
            entry,
            _permit: permit,
        }
    }

    pub(crate) fn try_lock(&self, slot: Slot) -> Result<SlotGuard<'_>, SlotError> {
        let entry = self.entry(slot);
        let permit = entry
            .gate
            .try_lock()
            .map_err(|_| SlotError::Busy { slot })?;
        Ok(SlotGuard {
            slot,
            entry,
            _permit: permit,
        })
    }

    /// Current binding of `slot`. Never waits and never loads.
    pub fn get(&self, slot: Slot) -> Option<Arc<SlotBinding>> {
        self.entry(slot).current.load_full()
    }

    /// Bind `model_id` into `slot`.
    ///
    /// Rebinding the model that is already bound returns the existing
    /// binding. Otherwise the previous engine is released first, then the
    /// model is validated and a new engine is created from the current engine
    /// config. Any failure leaves the slot unbound.
    pub async fn bind(&self, slot: Slot, model_id: ModelId) -> Result<Arc<SlotBinding>, SlotError> {
        let guard = self.lock(slot).await;

        if let Some(current) = guard.binding() {
            if current.model.id == model_id {
                tracing::debug!(
                    "{} slot already holds '{}', skipping load",
                    slot,
                    current.model.name
                );
                return Ok(current);
            }
        }

        self.unbind(guard.entry).await;

        let model = self
            .catalog
            .find_by_id(model_id)
            .await?
            .ok_or(SlotError::NotFound { id: model_id })?;
        if let Err(e) = self.validate(slot, &model).await {
            tracing::warn!("Refusing to bind '{}' into {} slot: {}", model.name, slot, e);
            return Err(e);
        }

        let config = self.state.snapshot().config;
        let params = LoadParams::new(&model.file_path, &config, slot.wants_embedding());

        tracing::info!(
            "Loading {} model '{}' (context {}, threads {}, batch {}, gpu layers {}, embedding {})",
            slot,
            model.name,
            params.context_length,
            params.threads,
            params.batch,
            params.gpu_layers,
            params.embedding
        );

        let engine = match self.loader.create(&params).await {
            Ok(engine) => engine,
            Err(source) => {
                tracing::error!("Could not load {} model '{}': {}", slot, model.name, source);
                if slot == Slot::MainChat {
                    self.session.mark_unloaded();
                }
                return Err(SlotError::LoadFailure {
                    slot,
                    name: model.name,
                    source,
                });
            }
        };

        let id = EngineId(self.next_engine_id.fetch_add(1, Ordering::SeqCst));
        let binding = Arc::new(SlotBinding {
            slot,
            handle: EngineHandle::new(id, params, engine),
            model,
        });
        guard.entry.current.store(Some(Arc::clone(&binding)));

        tracing::info!(
            "{} slot bound to '{}' as {}",
            slot,
            binding.model.name,
            binding.engine_id()
        );

        if slot == Slot::MainChat {
            let record = binding.model.clone();
            if let Err(e) = self.state.update(|s| s.last_model = Some(record)).await {
                tracing::warn!("Failed to persist last loaded model: {}", e);
            }
            self.session.mark_unloaded();
        }

        Ok(binding)
    }

    async fn validate(&self, slot: Slot, model: &ModelRecord) -> Result<(), SlotError> {
        let expected = slot.expected_model_type();
        if model.model_type != expected {
            return Err(SlotError::TypeMismatch {
                id: model.id,
                name: model.name.clone(),
                slot,
                expected,
                found: model.model_type,
            });
        }

        if self.policy.is_deprecated(model.quantization) {
            return Err(SlotError::UnsupportedFormat {
                id: model.id,
                name: model.name.clone(),
                quantization: quantization_label(model.quantization),
            });
        }

        let exists = tokio::fs::try_exists(&model.file_path)
            .await
            .unwrap_or(false);
        if !exists {
            return Err(SlotError::FileMissing {
                id: model.id,
                name: model.name.clone(),
                path: model.file_path.clone(),
            });
        }

        Ok(())
    }

    /// Clear the entry and release its engine. Callers hold the slot gate.
    async fn unbind(&self, entry: &SlotEntry) -> bool {
        let _live = entry.live.write().await;
        match entry.current.swap(None) {
            Some(previous) => {
                self.release_binding(&previous).await;
                true
            }
            None => false,
        }
    }

    async fn release_binding(&self, binding: &SlotBinding) {
        match binding.handle.release().await {
            Ok(()) => tracing::info!(
                "Released {} model '{}' ({})",
                binding.slot,
                binding.model.name,
                binding.engine_id()
            ),
            Err(e) => tracing::warn!(
                "Engine for {} model '{}' reported an error on release: {}",
                binding.slot,
                binding.model.name,
                e
            ),
        }
        if binding.slot == Slot::MainChat {
            self.session.mark_unloaded();
        }
    }

    /// Release whatever is bound to `slot`. Returns whether anything was
    /// bound.
    pub async fn release(&self, slot: Slot) -> bool {
        let guard = self.lock(slot).await;
        self.unbind(guard.entry).await
    }

    pub async fn release_all(&self) {
        for slot in Slot::ALL {
            self.release(slot).await;
        }
    }

    /// Ask the engine bound to `slot` to halt its running completion without
    /// waiting for the slot gate. Returns false when nothing is bound.
    pub(crate) async fn interrupt(&self, slot: Slot) -> Result<bool, SlotError> {
        let entry = self.entry(slot);
        let _live = entry.live.read().await;
        let Some(binding) = entry.current.load_full() else {
            return Ok(false);
        };
        binding
            .handle
            .engine()
            .stop_completion()
            .await
            .map_err(|source| SlotError::Engine { slot, source })?;
        Ok(true)
    }

    /// Embed `text` with the embedding slot's engine
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, SlotError> {
        let slot = Slot::Embedding;
        let guard = self.lock(slot).await;
        let binding = guard.bound()?;
        binding
            .handle
            .engine()
            .embedding(text)
            .await
            .map_err(|source| SlotError::Engine { slot, source })
    }

    pub async fn tokenize(&self, slot: Slot, text: &str) -> Result<Vec<TokenId>, SlotError> {
        let guard = self.lock(slot).await;
        let binding = guard.bound()?;
        binding
            .handle
            .engine()
            .tokenize(text)
            .await
            .map_err(|source| SlotError::Engine { slot, source })
    }

    pub async fn token_length(&self, slot: Slot, text: &str) -> Result<usize, SlotError> {
        Ok(self.tokenize(slot, text).await?.len())
    }
}
