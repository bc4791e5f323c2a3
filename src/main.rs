#![allow(clippy::multiple_crate_versions)]

use clap::{Arg, ArgAction, ArgMatches, Command};
use llamaslot_runtime::config::{LogFormat, LoggingConfig};
use llamaslot_runtime::RuntimeConfig;
use std::path::PathBuf;

mod commands;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn cli() -> Command {
    Command::new("llamaslot")
        .version(VERSION)
        .about("llamaslot - local inference resource manager")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Path to a llamaslot.toml configuration file"),
        )
        .subcommand(
            Command::new("config")
                .about("Show or change the engine configuration")
                .subcommand_required(true)
                .subcommand(Command::new("show").about("Print the effective configuration"))
                .subcommand(
                    Command::new("set")
                        .about("Change engine parameters used by the next model load")
                        .arg(engine_arg("context-length", "Context length in tokens"))
                        .arg(engine_arg("threads", "CPU threads"))
                        .arg(engine_arg("gpu-layers", "Layers offloaded to the GPU"))
                        .arg(engine_arg("batch", "Prompt batch size")),
                ),
        )
        .subcommand(
            Command::new("session")
                .about("Inspect the KV session cache")
                .subcommand_required(true)
                .subcommand(Command::new("info").about("Show the session file and cached tokens"))
                .subcommand(Command::new("clear").about("Delete the session file"))
                .subcommand(
                    Command::new("verify")
                        .about("Check whether a token sequence can reuse the cached session")
                        .arg(
                            Arg::new("tokens")
                                .value_name("TOKEN")
                                .num_args(1..)
                                .required(true)
                                .help("Token ids, separated by spaces or commas"),
                        ),
                ),
        )
        .subcommand(
            Command::new("models")
                .about("Manage the model catalog")
                .subcommand_required(true)
                .subcommand(Command::new("list").about("List imported models"))
                .subcommand(
                    Command::new("show")
                        .about("Show one model")
                        .arg(Arg::new("id").required(true).value_name("ID")),
                )
                .subcommand(
                    Command::new("add")
                        .about("Import a GGUF file into the catalog")
                        .arg(
                            Arg::new("path")
                                .long("path")
                                .value_name("FILE")
                                .required(true)
                                .help("Path to the model file"),
                        )
                        .arg(
                            Arg::new("name")
                                .long("name")
                                .value_name("NAME")
                                .help("Display name (defaults to the file stem)"),
                        )
                        .arg(
                            Arg::new("type")
                                .long("type")
                                .value_name("TYPE")
                                .default_value("main_chat")
                                .value_parser(["main_chat", "rag_embedding", "rag_reasoning"])
                                .help("Slot role of the model"),
                        )
                        .arg(
                            Arg::new("quantization")
                                .long("quantization")
                                .value_name("FILE_TYPE")
                                .value_parser(clap::value_parser!(u32))
                                .help("GGUF general.file_type code"),
                        )
                        .arg(
                            Arg::new("context-length")
                                .long("context-length")
                                .value_name("TOKENS")
                                .value_parser(clap::value_parser!(u32))
                                .help("Training context length"),
                        )
                        .arg(
                            Arg::new("params")
                                .long("params")
                                .value_name("SIZE")
                                .help("Parameter size label, e.g. 1.5B"),
                        )
                        .arg(
                            Arg::new("architecture")
                                .long("architecture")
                                .value_name("ARCH")
                                .help("general.architecture value"),
                        ),
                ),
        )
}

fn engine_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .value_name("N")
        .value_parser(clap::value_parser!(u32))
        .action(ArgAction::Set)
        .help(help)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

fn load_config(matches: &ArgMatches) -> RuntimeConfig {
    let path = matches.get_one::<String>("config").map(PathBuf::from);
    match RuntimeConfig::load(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("✗ {}", e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    let config = load_config(&matches);
    init_tracing(&config.logging);

    let code = match matches.subcommand() {
        Some(("config", sub_matches)) => commands::config::run(sub_matches, &config).await,
        Some(("session", sub_matches)) => commands::session::run(sub_matches, &config).await,
        Some(("models", sub_matches)) => commands::models::run(sub_matches, &config).await,
        _ => {
            println!("llamaslot v{}", VERSION);
            println!("Use --help for available commands");
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
}
