//! Command console
//!
//! Line-oriented console for trying the engine against an in-memory store.
//!
//! # Usage
//!
//! ```bash
//! # Patterns only, demo data
//! command_console --offline
//!
//! # With a hosted model (OPENAI_API_KEY), comparing routers in shadow mode
//! command_console --mode shadow
//! ```
//!
//! Console commands: `:log` shows the routing log, `:mode <disabled|shadow|active>`
//! switches the rollout mode, `:quit` exits.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use isms_command_engine::isms_llm::{LanguageModel, OpenAiClient};
use isms_command_engine::telemetry::init_tracing;
use isms_command_engine::{
    CommandEngine, EngineConfig, InMemoryStore, ObjectType, RolloutMode, SessionContext, Utterance,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

#[derive(Parser)]
#[command(name = "command_console")]
#[command(version = "0.1.0")]
#[command(about = "Interactive console for the ISMS command engine")]
struct Cli {
    /// YAML configuration file
    #[arg(long, short, env = "ISMS_CONFIG")]
    config: Option<PathBuf>,

    /// Rollout mode of the dual-path router
    #[arg(long, value_parser = parse_mode)]
    mode: Option<RolloutMode>,

    /// Never call the language model
    #[arg(long)]
    offline: bool,

    /// Start with an empty store
    #[arg(long)]
    empty: bool,

    /// Output format
    #[arg(long, short = 'o', default_value = "pretty", value_enum)]
    format: OutputFormat,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

fn parse_mode(value: &str) -> Result<RolloutMode, String> {
    RolloutMode::parse(value).ok_or_else(|| format!("unknown mode '{}'", value))
}

fn demo_store() -> InMemoryStore {
    let store = InMemoryStore::new()
        .with_container("dom-isms", "ISMS")
        .with_subtypes("dom-isms", ObjectType::Scope, &["SCP_Scope", "SCP_Controller", "SCP_Processor"])
        .with_subtypes("dom-isms", ObjectType::Asset, &["AST_IT-System", "AST_Application", "AST_Datatype"])
        .with_subtypes("dom-isms", ObjectType::Person, &["PER_Person", "PER_DataProtectionOfficer"])
        .with_subtypes("dom-isms", ObjectType::Control, &["CTL_TOM"]);
    store.seed("dom-isms", ObjectType::Scope, "SCOPE1", Some("SCP_Scope"));
    store.seed("dom-isms", ObjectType::Asset, "Desktop", Some("AST_IT-System"));
    store.seed("dom-isms", ObjectType::Asset, "Mail Server", Some("AST_IT-System"));
    store.seed("dom-isms", ObjectType::Person, "Ruby", Some("PER_Person"));
    store
}

fn load_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load_from_file(path)?,
        None => EngineConfig::default(),
    };
    config.apply_env()?;
    if let Some(mode) = cli.mode {
        config.shadow.mode = mode;
    }
    Ok(config)
}

fn model(cli: &Cli) -> Option<Arc<dyn LanguageModel>> {
    if cli.offline {
        return None;
    }
    match OpenAiClient::from_env() {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!(error = %e, "No language model configured, running offline");
            None
        }
    }
}

fn print_log(engine: &CommandEngine, session: &SessionContext) {
    let log = engine.router().routing_log(session);
    if log.is_empty() {
        println!("(routing log is empty)");
        return;
    }
    for entry in log.entries() {
        println!(
            "{}  {:<24} legacy={:<22} new={:<22} {}",
            entry.timestamp.format("%H:%M:%S"),
            entry.message_preview,
            entry.legacy_route,
            entry.new_route,
            if entry.agreement { "agree" } else { "DIFF" }
        );
    }
    if let Some(rate) = engine.router().agreement_rate(session) {
        println!("agreement: {:.0}%", rate * 100.0);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing("isms_command_engine=info");

    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let store = if cli.empty {
        InMemoryStore::new().with_container("dom-isms", "ISMS")
    } else {
        demo_store()
    };
    let engine = match CommandEngine::new(Arc::new(store), model(&cli), config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let mut session = engine.new_session();

    println!("ISMS command console. Type :quit to exit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line {
            ":quit" | ":q" => break,
            ":log" => {
                print_log(&engine, &session);
                continue;
            }
            _ => {}
        }
        if let Some(mode) = line.strip_prefix(":mode ") {
            match RolloutMode::parse(mode) {
                Some(mode) => engine.router().set_mode(mode),
                None => println!("unknown mode '{}'", mode.trim()),
            }
            continue;
        }

        let response = engine.handle(&Utterance::new(line), &mut session).await;
        match cli.format {
            OutputFormat::Json => match serde_json::to_string_pretty(&response) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("error: {}", e),
            },
            OutputFormat::Pretty => {
                if let Some(decision) = &response.decision {
                    println!("  [{}]", decision.describe());
                }
                println!("{}", response.message);
            }
        }
    }
    ExitCode::SUCCESS
}
