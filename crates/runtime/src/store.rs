//! Persisted engine state
//!
//! A single JSON document holding the engine configuration, the last main
//! chat model, the selected embedding and reasoning model ids, and the
//! token record of the last saved session.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::types::{ModelId, ModelRecord, SessionCacheRecord, StateStoreError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedEngineState {
    #[serde(default)]
    pub config: EngineConfig,
    #[serde(default)]
    pub last_model: Option<ModelRecord>,
    #[serde(default)]
    pub embedding_model_id: Option<ModelId>,
    #[serde(default)]
    pub rag_reasoning_model_id: Option<ModelId>,
    #[serde(default)]
    pub session: SessionCacheRecord,
}

/// Engine state backed by an optional JSON file.
///
/// Every `update` rewrites the whole document through a temp file and a
/// rename, so a crash never leaves a half written state behind. The new
/// state only becomes visible once it is on disk.
pub struct EngineStateStore {
    path: Option<PathBuf>,
    state: Mutex<PersistedEngineState>,
    writer: tokio::sync::Mutex<()>,
}

impl EngineStateStore {
    /// Open the state file at `path`, creating its parent directory.
    ///
    /// A missing file yields `initial`. A malformed file also yields
    /// `initial`, with a warning.
    pub fn open(
        path: impl Into<PathBuf>,
        initial: PersistedEngineState,
    ) -> Result<Self, StateStoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StateStoreError::Io {
                path: parent.to_path_buf(),
                message: e.to_string(),
            })?;
        }

        let state = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<PersistedEngineState>(&content) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(
                        "Engine state at {} is malformed, starting from defaults: {}",
                        path.display(),
                        e
                    );
                    initial
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => initial,
            Err(e) => {
                return Err(StateStoreError::Io {
                    path,
                    message: e.to_string(),
                })
            }
        };

        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    /// A store that never touches disk
    pub fn in_memory(initial: PersistedEngineState) -> Self {
        Self {
            path: None,
            state: Mutex::new(initial),
            writer: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> PersistedEngineState {
        self.state.lock().clone()
    }

    /// Apply `f` to a copy of the state and persist it. On error the current
    /// state is left unchanged.
    pub async fn update<F>(&self, f: F) -> Result<(), StateStoreError>
    where
        F: FnOnce(&mut PersistedEngineState),
    {
        let _writer = self.writer.lock().await;

        let mut next = self.snapshot();
        f(&mut next);

        if let Some(path) = &self.path {
            let payload = serde_json::to_vec_pretty(&next)
                .map_err(|e| StateStoreError::Serialization(e.to_string()))?;
            let path = path.clone();
            tokio::task::spawn_blocking(move || write_atomic(&path, &payload))
                .await
                .map_err(|e| StateStoreError::Io {
                    path: self.path.clone().unwrap_or_default(),
                    message: format!("state writer failed: {e}"),
                })??;
        }

        *self.state.lock() = next;
        Ok(())
    }
}

fn write_atomic(path: &Path, payload: &[u8]) -> Result<(), StateStoreError> {
    let tmp_path = path.with_extension("json.tmp");
    let io_err = |e: std::io::Error| StateStoreError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    let mut tmp_file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .map_err(io_err)?;

    if let Err(e) = tmp_file.write_all(payload).and_then(|_| tmp_file.sync_all()) {
        let _ = fs::remove_file(&tmp_path);
        return Err(io_err(e));
    }
    drop(tmp_file);

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(io_err(e));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelType;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_initial() {
        let dir = TempDir::new().unwrap();
        let initial = PersistedEngineState {
            embedding_model_id: Some(3),
            ..Default::default()
        };
        let store = EngineStateStore::open(dir.path().join("state.json"), initial.clone()).unwrap();
        assert_eq!(store.snapshot(), initial);
    }

    #[tokio::test]
    async fn test_update_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = EngineStateStore::open(&path, PersistedEngineState::default()).unwrap();
        store
            .update(|s| {
                s.config.threads = 8;
                s.last_model = Some(ModelRecord::new(
                    1,
                    "qwen",
                    "/models/qwen.gguf",
                    ModelType::MainChat,
                ));
                s.session.tokens = vec![1, 2, 3];
                s.session.persisted = true;
            })
            .await
            .unwrap();
        drop(store);

        let reopened = EngineStateStore::open(&path, PersistedEngineState::default()).unwrap();
        let state = reopened.snapshot();
        assert_eq!(state.config.threads, 8);
        assert_eq!(state.last_model.unwrap().name, "qwen");
        assert_eq!(state.session.tokens, vec![1, 2, 3]);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_malformed_file_yields_initial() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();

        let store = EngineStateStore::open(&path, PersistedEngineState::default()).unwrap();
        assert_eq!(store.snapshot(), PersistedEngineState::default());
    }

    #[test]
    fn test_malformed_engine_fields_fall_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{"config": {"context_length": "big", "threads": 6}, "embedding_model_id": 9}"#,
        )
        .unwrap();

        let store = EngineStateStore::open(&path, PersistedEngineState::default()).unwrap();
        let state = store.snapshot();
        assert_eq!(state.config.context_length, 4096);
        assert_eq!(state.config.threads, 6);
        assert_eq!(state.embedding_model_id, Some(9));
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = EngineStateStore::in_memory(PersistedEngineState::default());
        store
            .update(|s| s.rag_reasoning_model_id = Some(4))
            .await
            .unwrap();
        assert_eq!(store.snapshot().rag_reasoning_model_id, Some(4));
        assert!(store.path().is_none());
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let store = EngineStateStore::open(&path, PersistedEngineState::default()).unwrap();

        // A directory in the temp file's place makes the write fail.
        fs::create_dir(path.with_extension("json.tmp")).unwrap();

        let result = store.update(|s| s.config.threads = 8).await;
        assert!(matches!(result, Err(StateStoreError::Io { .. })));
        assert_eq!(store.snapshot().config.threads, 4);
        assert!(!path.exists());
    }
}
