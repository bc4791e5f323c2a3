pub mod config;
pub mod models;
pub mod session;

use llamaslot_runtime::{EngineStateStore, PersistedEngineState, RuntimeConfig};

/// Open the persisted engine state the runtime would use
pub(crate) fn open_state(config: &RuntimeConfig) -> Result<EngineStateStore, String> {
    let initial = PersistedEngineState {
        config: config.engine,
        ..Default::default()
    };
    EngineStateStore::open(config.state_path(), initial).map_err(|e| e.to_string())
}
