//! Error types for the local inference runtime

use std::path::PathBuf;
use thiserror::Error;

use super::{ModelId, ModelType, Slot};
use crate::models::ModelCatalogError;

/// Top level error returned by [`crate::InferenceRuntime`]
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] crate::config::ConfigError),

    #[error("State store error: {0}")]
    State(#[from] StateStoreError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] ModelCatalogError),

    #[error(transparent)]
    Slot(#[from] SlotError),
}

/// Errors raised by slot, completion and session operations
#[derive(Error, Debug)]
pub enum SlotError {
    #[error("Model with id {id} not found in catalog")]
    NotFound { id: ModelId },

    #[error("Model '{name}' (id {id}) is type '{found}', expected '{expected}' for the {slot} slot")]
    TypeMismatch {
        id: ModelId,
        name: String,
        slot: Slot,
        expected: ModelType,
        found: ModelType,
    },

    #[error("Model '{name}' (id {id}) uses quantization {quantization}, which is no longer supported")]
    UnsupportedFormat {
        id: ModelId,
        name: String,
        quantization: String,
    },

    #[error("Model file not found for '{name}' at {}", .path.display())]
    FileMissing {
        id: ModelId,
        name: String,
        path: PathBuf,
    },

    #[error("Could not load {slot} model '{name}': {source}")]
    LoadFailure {
        slot: Slot,
        name: String,
        #[source]
        source: EngineError,
    },

    #[error("No model loaded in the {slot} slot")]
    NoModelLoaded { slot: Slot },

    #[error("No model selected for the {slot} slot")]
    NoModelSelected { slot: Slot },

    #[error("The {slot} slot is busy with another operation")]
    Busy { slot: Slot },

    #[error("Session cache I/O failed: {reason}")]
    SessionIo { reason: String },

    #[error("Engine error in the {slot} slot: {source}")]
    Engine {
        slot: Slot,
        #[source]
        source: EngineError,
    },

    #[error("Catalog error: {0}")]
    Catalog(#[from] ModelCatalogError),
}

/// Failures reported by a native engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("initialization failed: {0}")]
    Initialization(String),

    #[error("completion failed: {0}")]
    Completion(String),

    #[error("tokenization failed: {0}")]
    Tokenize(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("session state failed: {0}")]
    Session(String),

    #[error("release failed: {0}")]
    Release(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),
}

/// Errors from the persisted engine state
#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("IO error on {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}
