//! `deckflow` command-line client
//!
//! Drives one presentation through the orchestrator:
//! - `status`: one-shot snapshot of stages and slides
//! - `watch`: follow remote progress until the pipeline settles
//! - `run`: start a stage
//! - `suggest`: ask for an edit and optionally apply it
//! - `create`: start a new presentation

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use deckflow_core::config::{BASE_URL_ENV, CONFIG_ENV};
use deckflow_core::DeckflowConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

fn cli() -> Command {
    Command::new("deckflow")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Presentation pipeline client")
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .env(CONFIG_ENV)
                .value_parser(value_parser!(PathBuf))
                .help("Path to a TOML config file"),
        )
        .arg(
            Arg::new("base-url")
                .long("base-url")
                .global(true)
                .help("Override the service base URL"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("status")
                .about("Show stage status and slides")
                .arg(Arg::new("id").required(true).help("Presentation id")),
        )
        .subcommand(
            Command::new("watch")
                .about("Follow remote progress until the pipeline settles")
                .arg(Arg::new("id").required(true).help("Presentation id"))
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .value_parser(value_parser!(u64))
                        .help("Give up after this many seconds"),
                ),
        )
        .subcommand(
            Command::new("run")
                .about("Start a pipeline stage")
                .arg(Arg::new("id").required(true).help("Presentation id"))
                .arg(
                    Arg::new("stage")
                        .required(true)
                        .value_parser(value_parser!(deckflow_model::StageKind))
                        .help("Stage to run (research, manual_research, slides, illustration, compiled, pptx)"),
                )
                .arg(
                    Arg::new("param")
                        .long("param")
                        .short('p')
                        .action(ArgAction::Append)
                        .value_parser(commands::parse_param)
                        .help("Run parameter as key=value; the value is parsed as JSON when possible"),
                )
                .arg(
                    Arg::new("wait")
                        .long("wait")
                        .action(ArgAction::SetTrue)
                        .help("Keep polling until the stage finishes"),
                ),
        )
        .subcommand(
            Command::new("suggest")
                .about("Ask for an edit suggestion")
                .arg(Arg::new("id").required(true).help("Presentation id"))
                .arg(Arg::new("prompt").required(true).help("What to change"))
                .arg(
                    Arg::new("slide")
                        .long("slide")
                        .help("Scope the request to this slide"),
                )
                .arg(
                    Arg::new("apply")
                        .long("apply")
                        .action(ArgAction::SetTrue)
                        .help("Apply the suggestion right away"),
                ),
        )
        .subcommand(
            Command::new("create")
                .about("Create a new presentation")
                .arg(Arg::new("name").required(true).help("Display name"))
                .arg(Arg::new("topic").required(true).help("Topic"))
                .arg(Arg::new("author").long("author").help("Author"))
                .arg(
                    Arg::new("manual")
                        .long("manual")
                        .action(ArgAction::SetTrue)
                        .help("Supply research manually instead of generating it"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("deckflow=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// File (or defaults), then environment, then command-line flags
fn resolve_config(matches: &ArgMatches) -> Result<DeckflowConfig> {
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => DeckflowConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => DeckflowConfig::new(),
    };
    let mut config = config.with_env_overrides();
    if let Some(url) = matches.get_one::<String>("base-url") {
        config.remote.base_url.clone_from(url);
    }
    config
        .validate()
        .with_context(|| format!("invalid configuration (see {CONFIG_ENV} / {BASE_URL_ENV})"))?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("log-json"));

    if let Err(err) = dispatch(&matches).await {
        tracing::error!("{:#}", err);
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn dispatch(matches: &ArgMatches) -> Result<()> {
    let config = resolve_config(matches)?;
    match matches.subcommand() {
        Some(("status", args)) => commands::status(&config, args).await,
        Some(("watch", args)) => commands::watch(&config, args).await,
        Some(("run", args)) => commands::run(&config, args).await,
        Some(("suggest", args)) => commands::suggest(&config, args).await,
        Some(("create", args)) => commands::create(&config, args).await,
        _ => {
            cli().print_help()?;
            Ok(())
        }
    }
}
