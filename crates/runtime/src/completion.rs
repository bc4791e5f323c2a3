//! Streaming completions against a bound slot
//!
//! Only one completion may run per slot; a second request while one is in
//! flight fails with `Busy` instead of queueing. `stop` is advisory: the
//! running call still resolves, with whatever text was streamed so far.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::engine::{CompletionOutput, CompletionParams, CompletionTimings, SlotBinding};
use crate::session::{SessionCache, SessionSaveReport};
use crate::slots::SlotTable;
use crate::types::{Slot, SlotError};

/// What happened to the KV session after a completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPersistence {
    Disabled,
    Saved(SessionSaveReport),
    /// Non-fatal: generation succeeded but the session was not saved
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResult {
    pub text: String,
    pub timings: CompletionTimings,
    /// Generation ended early because `stop` was requested
    pub stopped: bool,
    pub session: SessionPersistence,
}

pub struct CompletionCoordinator {
    slots: Arc<SlotTable>,
    session: Arc<SessionCache>,
    persist_session: AtomicBool,
    stop_requested: [AtomicBool; 3],
    completed: AtomicU64,
}

impl CompletionCoordinator {
    pub fn new(slots: Arc<SlotTable>, session: Arc<SessionCache>, persist_session: bool) -> Self {
        Self {
            slots,
            session,
            persist_session: AtomicBool::new(persist_session),
            stop_requested: Default::default(),
            completed: AtomicU64::new(0),
        }
    }

    pub fn set_persist_session(&self, enabled: bool) {
        self.persist_session.store(enabled, Ordering::SeqCst);
    }

    pub fn persist_session(&self) -> bool {
        self.persist_session.load(Ordering::SeqCst)
    }

    /// Number of completions that have resolved since startup
    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Run a main chat completion
    pub async fn complete<F>(
        &self,
        params: CompletionParams,
        on_token: F,
    ) -> Result<CompletionResult, SlotError>
    where
        F: FnMut(&str) + Send,
    {
        self.complete_on(Slot::MainChat, params, on_token).await
    }

    /// Run a completion on any bound slot. Session persistence only applies
    /// to the main chat slot.
    pub async fn complete_on<F>(
        &self,
        slot: Slot,
        params: CompletionParams,
        mut on_token: F,
    ) -> Result<CompletionResult, SlotError>
    where
        F: FnMut(&str) + Send,
    {
        let guard = self.slots.try_lock(slot)?;
        let binding = guard.bound()?;

        let stop_flag = &self.stop_requested[slot.index()];
        stop_flag.store(false, Ordering::SeqCst);

        tracing::debug!(
            "Starting completion on {} slot with '{}'",
            slot,
            binding.model.name
        );

        let mut partial = String::new();
        let mut sink = |piece: &str| {
            partial.push_str(piece);
            on_token(piece);
        };
        let outcome = binding.handle.engine().completion(&params, &mut sink).await;
        let stop_requested = stop_flag.swap(false, Ordering::SeqCst);

        let output = match outcome {
            Ok(output) => output,
            Err(e) if stop_requested => {
                tracing::warn!(
                    "Engine reported an error after stop was requested, keeping partial text: {}",
                    e
                );
                CompletionOutput {
                    text: partial,
                    timings: CompletionTimings::default(),
                    stopped: true,
                }
            }
            Err(source) => return Err(SlotError::Engine { slot, source }),
        };

        let stopped = output.stopped || stop_requested;
        let count = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(
            "Completion #{} on {} slot finished{}\n{}",
            count,
            slot,
            if stopped { " (stopped)" } else { "" },
            output.timings
        );

        let session = if slot == Slot::MainChat && self.persist_session() {
            self.persist(&binding, &params.prompt).await
        } else {
            SessionPersistence::Disabled
        };

        Ok(CompletionResult {
            text: output.text,
            timings: output.timings,
            stopped,
            session,
        })
    }

    async fn persist(&self, binding: &SlotBinding, prompt: &str) -> SessionPersistence {
        let tokens = match binding.handle.engine().tokenize(prompt).await {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!("Could not tokenize prompt for session save: {}", e);
                return SessionPersistence::Failed {
                    reason: e.to_string(),
                };
            }
        };

        match self.session.save(binding, tokens).await {
            Ok(report) => SessionPersistence::Saved(report),
            Err(e) => {
                tracing::warn!("Session not saved: {}", e);
                SessionPersistence::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Request the main chat completion to halt
    pub async fn stop(&self) -> Result<bool, SlotError> {
        self.stop_on(Slot::MainChat).await
    }

    /// Request the completion on `slot` to halt. Returns false when nothing
    /// is bound there.
    pub async fn stop_on(&self, slot: Slot) -> Result<bool, SlotError> {
        self.stop_requested[slot.index()].store(true, Ordering::SeqCst);
        let interrupted = self.slots.interrupt(slot).await?;
        if interrupted {
            tracing::debug!("Stop requested on {} slot", slot);
        }
        Ok(interrupted)
    }
}
