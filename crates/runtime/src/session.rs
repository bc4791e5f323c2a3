//! KV session cache
//!
//! One session file per install holds the main chat engine's KV state. The
//! token sequence that produced it is kept in the engine state store so a
//! later prompt can be checked for prefix reuse.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::engine::SlotBinding;
use crate::store::EngineStateStore;
use crate::types::{readable_file_size, SessionCacheRecord, Slot, SlotError, TokenId};

/// Outcome of a successful session save
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSaveReport {
    /// Tokens the engine reports writing
    pub saved_tokens: usize,
    /// Tokens recorded as the cached prompt
    pub recorded_tokens: usize,
    pub file_size: u64,
    pub elapsed: Duration,
}

/// Outcome of a session restore attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionLoad {
    /// No session file on disk
    NothingToLoad,
    Restored { file_size: u64 },
    /// The engine could not restore the file and starts from an empty cache
    Failed { reason: String },
}

/// Result of comparing a candidate prompt with the cached tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KvVerifyResult {
    pub matched: bool,
    pub match_length: usize,
    pub input_length: usize,
    pub cached_length: usize,
}

/// Snapshot for tooling and display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub path: PathBuf,
    pub exists: bool,
    pub file_size: Option<u64>,
    pub cached_tokens: usize,
    pub persisted: bool,
    pub loaded: bool,
}

/// Strict longest-common-prefix check between cached and candidate tokens.
///
/// `matched` holds only when one sequence is a prefix of the other.
pub fn verify_prefix(cached: &[TokenId], candidate: &[TokenId]) -> KvVerifyResult {
    let match_length = cached
        .iter()
        .zip(candidate)
        .take_while(|(a, b)| a == b)
        .count();

    KvVerifyResult {
        matched: match_length == cached.len().min(candidate.len()),
        match_length,
        input_length: candidate.len(),
        cached_length: cached.len(),
    }
}

pub struct SessionCache {
    path: PathBuf,
    state: Arc<EngineStateStore>,
    loaded: AtomicBool,
}

impl SessionCache {
    pub fn new(path: impl Into<PathBuf>, state: Arc<EngineStateStore>) -> Self {
        Self {
            path: path.into(),
            state,
            loaded: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist the main chat engine's KV state and record `tokens` as its
    /// prompt. The caller must hold the main chat slot.
    ///
    /// On failure the recorded tokens are cleared, since the file contents
    /// are no longer known.
    pub async fn save(
        &self,
        binding: &SlotBinding,
        tokens: Vec<TokenId>,
    ) -> Result<SessionSaveReport, SlotError> {
        ensure_main_chat(binding)?;

        if let Err(e) = self.ensure_file().await {
            self.clear_record().await;
            return Err(SlotError::SessionIo {
                reason: format!("could not create {}: {}", self.path.display(), e),
            });
        }

        let start = Instant::now();
        let saved_tokens = match binding.handle.engine().save_session(&self.path).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("Failed to save KV cache: {}", e);
                self.clear_record().await;
                return Err(SlotError::SessionIo {
                    reason: e.to_string(),
                });
            }
        };
        let elapsed = start.elapsed();

        let recorded_tokens = tokens.len();
        let update = self.state.update(|s| {
            s.session = SessionCacheRecord {
                tokens,
                persisted: true,
            }
        });
        if let Err(e) = update.await {
            tracing::warn!("Session saved but its token record was not persisted: {}", e);
        }

        let file_size = self.file_size().await.unwrap_or(0);
        tracing::info!(
            "Saved KV in {}ms with {} tokens",
            elapsed.as_millis(),
            saved_tokens
        );
        tracing::info!("Current KV Size is: {}", readable_file_size(file_size));

        Ok(SessionSaveReport {
            saved_tokens,
            recorded_tokens,
            file_size,
            elapsed,
        })
    }

    /// Restore KV state from disk into the main chat engine. Never fails on
    /// a missing or unreadable file.
    pub async fn load(&self, binding: &SlotBinding) -> Result<SessionLoad, SlotError> {
        ensure_main_chat(binding)?;

        let Some(file_size) = self.file_size().await else {
            tracing::warn!("No cache file found at {}", self.path.display());
            return Ok(SessionLoad::NothingToLoad);
        };

        match binding.handle.engine().load_session(&self.path).await {
            Ok(()) => {
                self.loaded.store(true, Ordering::SeqCst);
                tracing::info!(
                    "Session loaded from {} ({})",
                    self.path.display(),
                    readable_file_size(file_size)
                );
                Ok(SessionLoad::Restored { file_size })
            }
            Err(e) => {
                tracing::error!("Failed to load session, starting from empty cache: {}", e);
                Ok(SessionLoad::Failed {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Compare `candidate` against the tokens of the last saved session
    pub fn verify(&self, candidate: &[TokenId]) -> KvVerifyResult {
        let record = self.record();
        verify_prefix(&record.tokens, candidate)
    }

    pub fn record(&self) -> SessionCacheRecord {
        self.state.snapshot().session
    }

    pub async fn file_size(&self) -> Option<u64> {
        tokio::fs::metadata(&self.path).await.ok().map(|m| m.len())
    }

    pub async fn info(&self) -> SessionInfo {
        let file_size = self.file_size().await;
        let record = self.record();
        SessionInfo {
            path: self.path.clone(),
            exists: file_size.is_some(),
            file_size,
            cached_tokens: record.tokens.len(),
            persisted: record.persisted,
            loaded: self.is_loaded(),
        }
    }

    /// Remove the session file and forget its tokens. Returns whether a file
    /// was deleted.
    pub async fn delete(&self) -> Result<bool, SlotError> {
        let removed = match tokio::fs::remove_file(&self.path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                return Err(SlotError::SessionIo {
                    reason: format!("could not delete {}: {}", self.path.display(), e),
                })
            }
        };

        self.clear_record().await;
        self.mark_unloaded();
        if removed {
            tracing::info!("Session cache deleted");
        }
        Ok(removed)
    }

    /// Whether the current main chat engine has restored the session file
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_unloaded(&self) {
        self.loaded.store(false, Ordering::SeqCst);
    }

    async fn ensure_file(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        Ok(())
    }

    async fn clear_record(&self) {
        if let Err(e) = self
            .state
            .update(|s| s.session = SessionCacheRecord::default())
            .await
        {
            tracing::warn!("Failed to clear session record: {}", e);
        }
    }
}

fn ensure_main_chat(binding: &SlotBinding) -> Result<(), SlotError> {
    if binding.slot == Slot::MainChat {
        Ok(())
    } else {
        Err(SlotError::SessionIo {
            reason: format!("the session cache belongs to the main chat slot, not {}", binding.slot),
        })
    }
}
