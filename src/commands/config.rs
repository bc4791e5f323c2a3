use clap::ArgMatches;
use llamaslot_runtime::{EngineConfig, RuntimeConfig};

use super::open_state;

pub async fn run(matches: &ArgMatches, config: &RuntimeConfig) -> i32 {
    match matches.subcommand() {
        Some(("show", _)) => show(config),
        Some(("set", sub_matches)) => set(sub_matches, config).await,
        _ => {
            eprintln!("✗ Unknown config command");
            1
        }
    }
}

fn show(config: &RuntimeConfig) -> i32 {
    let state = match open_state(config) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("✗ Could not open engine state: {}", e);
            return 1;
        }
    };

    let mut effective = config.clone();
    effective.engine = state.snapshot().config;

    match toml::to_string_pretty(&effective) {
        Ok(text) => {
            println!("⚙️  Effective configuration\n");
            println!("{}", text);
            println!("Session file: {}", config.session_path().display());
            println!("State file:   {}", config.state_path().display());
            println!("Catalog:      {}", config.catalog_path().display());
            0
        }
        Err(e) => {
            eprintln!("✗ Could not render configuration: {}", e);
            1
        }
    }
}

async fn set(matches: &ArgMatches, config: &RuntimeConfig) -> i32 {
    let state = match open_state(config) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("✗ Could not open engine state: {}", e);
            return 1;
        }
    };

    let current = state.snapshot().config;
    let updated = apply_overrides(
        current,
        matches.get_one::<u32>("context-length").copied(),
        matches.get_one::<u32>("threads").copied(),
        matches.get_one::<u32>("gpu-layers").copied(),
        matches.get_one::<u32>("batch").copied(),
    );

    if updated == current {
        println!("• Nothing to change");
        return 0;
    }

    if let Err(e) = updated.validate() {
        eprintln!("✗ {}", e);
        return 1;
    }

    if let Err(e) = state.update(|s| s.config = updated).await {
        eprintln!("✗ Could not save engine state: {}", e);
        return 1;
    }

    println!("✓ Engine configuration updated");
    println!(
        "  context {} • threads {} • gpu layers {} • batch {}",
        updated.context_length, updated.threads, updated.gpu_layers, updated.batch
    );
    println!("  Loaded models keep their old settings until they are reloaded.");
    0
}

fn apply_overrides(
    mut engine: EngineConfig,
    context_length: Option<u32>,
    threads: Option<u32>,
    gpu_layers: Option<u32>,
    batch: Option<u32>,
) -> EngineConfig {
    if let Some(v) = context_length {
        engine.context_length = v;
    }
    if let Some(v) = threads {
        engine.threads = v;
    }
    if let Some(v) = gpu_layers {
        engine.gpu_layers = v;
    }
    if let Some(v) = batch {
        engine.batch = v;
    }
    engine
}
