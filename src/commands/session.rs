use clap::ArgMatches;
use llamaslot_runtime::{readable_file_size, RuntimeConfig, SessionCache, TokenId};
use std::sync::Arc;

use super::open_state;

pub async fn run(matches: &ArgMatches, config: &RuntimeConfig) -> i32 {
    let state = match open_state(config) {
        Ok(state) => Arc::new(state),
        Err(e) => {
            eprintln!("✗ Could not open engine state: {}", e);
            return 1;
        }
    };
    let cache = SessionCache::new(config.session_path(), state);

    match matches.subcommand() {
        Some(("info", _)) => info(&cache).await,
        Some(("clear", _)) => clear(&cache).await,
        Some(("verify", sub_matches)) => {
            let raw: Vec<String> = sub_matches
                .get_many::<String>("tokens")
                .map(|values| values.cloned().collect())
                .unwrap_or_default();
            verify(&cache, &raw)
        }
        _ => {
            eprintln!("✗ Unknown session command");
            1
        }
    }
}

async fn info(cache: &SessionCache) -> i32 {
    let info = cache.info().await;
    println!("💾 KV session cache\n");
    println!("  • File: {}", info.path.display());
    match info.file_size {
        Some(size) => println!("  • Size: {}", readable_file_size(size)),
        None => println!("  • Size: (no session file)"),
    }
    println!("  • Cached prompt tokens: {}", info.cached_tokens);
    println!(
        "  • Last save: {}",
        if info.persisted { "✓ succeeded" } else { "✗ none" }
    );
    0
}

async fn clear(cache: &SessionCache) -> i32 {
    match cache.delete().await {
        Ok(true) => {
            println!("✓ Session cache deleted");
            0
        }
        Ok(false) => {
            println!("• No session cache to delete");
            0
        }
        Err(e) => {
            eprintln!("✗ {}", e);
            1
        }
    }
}

fn verify(cache: &SessionCache, raw: &[String]) -> i32 {
    let tokens = match parse_tokens(raw) {
        Ok(tokens) => tokens,
        Err(e) => {
            eprintln!("✗ {}", e);
            return 1;
        }
    };

    let result = cache.verify(&tokens);
    if result.matched {
        println!(
            "✓ Cache reusable: {} of {} tokens match the {} cached",
            result.match_length, result.input_length, result.cached_length
        );
    } else {
        println!(
            "✗ Cache diverges at token {}: {} input tokens, {} cached",
            result.match_length, result.input_length, result.cached_length
        );
    }
    0
}

/// Accepts ids separated by whitespace, commas, or both
fn parse_tokens(raw: &[String]) -> Result<Vec<TokenId>, String> {
    raw.iter()
        .flat_map(|arg| arg.split(|c: char| c == ',' || c.is_whitespace()))
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<TokenId>()
                .map_err(|_| format!("'{}' is not a token id", part))
        })
        .collect()
}
