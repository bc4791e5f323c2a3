//! Scripted engine and loader shared by the integration tests.
//!
//! The loader records every create and release in order, so tests can
//! assert that an old engine was released before its replacement was built.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use llamaslot_runtime::engine::{
    saved_tokens_from_native, CompletionOutput, CompletionParams, CompletionTimings,
    EngineLoader, InferenceEngine, LoadParams,
};
use llamaslot_runtime::{
    EngineError, InMemoryModelCatalog, InferenceRuntime, ModelRecord, ModelType, RuntimeConfig,
    TokenId,
};

pub const CHAT_A: i64 = 1;
pub const CHAT_B: i64 = 2;
pub const EMBED: i64 = 3;
pub const REASON: i64 = 4;
pub const DEPRECATED: i64 = 5;
pub const MISSING_FILE: i64 = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Created(String),
    Released(String),
}

/// Knobs for how engines created by the loader behave
#[derive(Debug, Clone)]
pub struct Script {
    pub pieces: Vec<String>,
    /// After the first piece, wait until `stop_completion` is called
    pub hold_until_stop: bool,
    /// Report an error instead of resolving when stopped mid-generation
    pub error_on_stop: bool,
    pub fail_session_save: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            pieces: vec!["Hello".into(), ",".into(), " world".into()],
            hold_until_stop: false,
            error_on_stop: false,
            fail_session_save: false,
        }
    }
}

/// Deterministic whitespace tokenizer
pub fn tokenize(text: &str) -> Vec<TokenId> {
    text.split_whitespace()
        .map(|word| word.bytes().map(i32::from).sum())
        .collect()
}

pub struct ScriptedEngine {
    name: String,
    params: LoadParams,
    script: Script,
    events: Arc<Mutex<Vec<Event>>>,
    stop: AtomicBool,
    released: AtomicBool,
    last_prompt_tokens: Mutex<usize>,
}

impl ScriptedEngine {
    pub fn params(&self) -> &LoadParams {
        &self.params
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    async fn completion(
        &self,
        params: &CompletionParams,
        on_token: &mut (dyn for<'t> FnMut(&'t str) + Send),
    ) -> Result<CompletionOutput, EngineError> {
        self.stop.store(false, Ordering::SeqCst);
        *self.last_prompt_tokens.lock() = tokenize(&params.prompt).len();

        let mut text = String::new();
        let mut stopped = false;
        for (i, piece) in self.script.pieces.iter().enumerate() {
            if self.stop.load(Ordering::SeqCst) {
                stopped = true;
                break;
            }
            // Each piece is detokenized into a fresh buffer.
            let token = piece.to_string();
            on_token(&token);
            text.push_str(&token);

            if i == 0 && self.script.hold_until_stop {
                while !self.stop.load(Ordering::SeqCst) {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        }

        if stopped && self.script.error_on_stop {
            return Err(EngineError::Completion("generation aborted".into()));
        }

        let predicted_n = if stopped { 1 } else { self.script.pieces.len() as u32 };
        Ok(CompletionOutput {
            text,
            timings: CompletionTimings {
                prompt_n: tokenize(&params.prompt).len() as u32,
                prompt_ms: 10.0,
                predicted_n,
                predicted_ms: 20.0,
                ..Default::default()
            },
            stopped,
        })
    }

    async fn stop_completion(&self) -> Result<(), EngineError> {
        if self.is_released() {
            return Err(EngineError::Release("stop on a released engine".into()));
        }
        self.stop.store(true, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if self.is_released() {
            return Err(EngineError::Release("released during stop".into()));
        }
        Ok(())
    }

    async fn tokenize(&self, text: &str) -> Result<Vec<TokenId>, EngineError> {
        Ok(tokenize(text))
    }

    async fn embedding(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        if !self.params.embedding {
            return Err(EngineError::Unsupported(
                "engine was not created in embedding mode".into(),
            ));
        }
        Ok(vec![text.len() as f32, 1.0, 0.0])
    }

    async fn save_session(&self, path: &Path) -> Result<usize, EngineError> {
        if self.script.fail_session_save {
            return saved_tokens_from_native(-1);
        }
        let tokens = *self.last_prompt_tokens.lock();
        tokio::fs::write(path, format!("KV:{}:{}", self.name, tokens))
            .await
            .map_err(|e| EngineError::Session(e.to_string()))?;
        Ok(tokens)
    }

    async fn load_session(&self, path: &Path) -> Result<(), EngineError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| EngineError::Session(e.to_string()))?;
        if content.starts_with("KV:") {
            Ok(())
        } else {
            Err(EngineError::Session("unrecognized session file".into()))
        }
    }

    async fn release(&self) -> Result<(), EngineError> {
        self.released.store(true, Ordering::SeqCst);
        self.events.lock().push(Event::Released(self.name.clone()));
        Ok(())
    }
}

#[derive(Default)]
pub struct ScriptedLoader {
    pub events: Arc<Mutex<Vec<Event>>>,
    script: Mutex<Script>,
    failing: Mutex<HashSet<String>>,
    engines: Mutex<Vec<Arc<ScriptedEngine>>>,
}

impl ScriptedLoader {
    pub fn set_script(&self, script: Script) {
        *self.script.lock() = script;
    }

    /// Make creation fail for model files with this stem
    pub fn fail_on(&self, name: &str) {
        self.failing.lock().insert(name.to_string());
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn created_count(&self) -> usize {
        self.engines.lock().len()
    }

    pub fn engine(&self, index: usize) -> Arc<ScriptedEngine> {
        Arc::clone(&self.engines.lock()[index])
    }

    pub fn last_engine(&self) -> Arc<ScriptedEngine> {
        let engines = self.engines.lock();
        Arc::clone(engines.last().expect("no engine created"))
    }
}

#[async_trait]
impl EngineLoader for ScriptedLoader {
    async fn create(&self, params: &LoadParams) -> Result<Arc<dyn InferenceEngine>, EngineError> {
        let name = params
            .model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        // Give concurrent callers a chance to interleave.
        tokio::time::sleep(Duration::from_millis(10)).await;

        if self.failing.lock().contains(&name) {
            return Err(EngineError::Initialization(format!(
                "failed to load {}",
                name
            )));
        }

        self.events.lock().push(Event::Created(name.clone()));
        let engine = Arc::new(ScriptedEngine {
            name,
            params: params.clone(),
            script: self.script.lock().clone(),
            events: Arc::clone(&self.events),
            stop: AtomicBool::new(false),
            released: AtomicBool::new(false),
            last_prompt_tokens: Mutex::new(0),
        });
        self.engines.lock().push(Arc::clone(&engine));
        Ok(engine)
    }
}

pub struct Fixture {
    pub dir: TempDir,
    pub catalog: Arc<InMemoryModelCatalog>,
    pub loader: Arc<ScriptedLoader>,
    pub runtime: InferenceRuntime,
}

fn model(dir: &Path, id: i64, stem: &str, model_type: ModelType, on_disk: bool) -> ModelRecord {
    let path: PathBuf = dir.join("models").join(format!("{}.gguf", stem));
    if on_disk {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"GGUF").unwrap();
    }
    ModelRecord::new(id, stem, path, model_type).with_quantization(15)
}

pub fn fixture() -> Fixture {
    fixture_with(|_| {})
}

pub fn fixture_with(configure: impl FnOnce(&mut RuntimeConfig)) -> Fixture {
    let dir = TempDir::new().unwrap();
    let root = dir.path();

    let catalog = Arc::new(InMemoryModelCatalog::with_models([
        model(root, CHAT_A, "chat-a", ModelType::MainChat, true),
        model(root, CHAT_B, "chat-b", ModelType::MainChat, true),
        model(root, EMBED, "embed", ModelType::Embedding, true),
        model(root, REASON, "reason", ModelType::RagReasoning, true),
        model(root, DEPRECATED, "old-q4-2", ModelType::MainChat, true).with_quantization(5),
        model(root, MISSING_FILE, "gone", ModelType::MainChat, false),
    ]));
    let loader = Arc::new(ScriptedLoader::default());

    let mut config = RuntimeConfig {
        data_dir: root.join("data"),
        ..RuntimeConfig::default()
    };
    configure(&mut config);

    let runtime = InferenceRuntime::new(config, catalog.clone(), loader.clone()).unwrap();

    Fixture {
        dir,
        catalog,
        loader,
        runtime,
    }
}
