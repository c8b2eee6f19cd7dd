use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use w5_telemetry::logging::init_logger_with_level;
use w5_telemetry::{
    decode_payload, init_logger, log_info, process_backlog, MemoryStore, ProcessingConfig,
    RunSummary, StoreReport, StoreSnapshot,
};

#[derive(Parser)]
#[command(name = "w5-cli")]
#[command(about = "CLI tool for Water5 meter telemetry")]
struct Cli {
    /// Log at debug level, ignoring RUST_LOG
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode one hex payload and print its fields
    Decode { hex: String },
    /// Process a JSON store snapshot and print what would be persisted
    Replay {
        snapshot: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct ReplayOutput {
    summary: RunSummary,
    store: StoreReport,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        init_logger_with_level(log::LevelFilter::Debug);
    } else {
        init_logger();
    }

    match cli.command {
        Commands::Decode { hex } => {
            let decoded = decode_payload(&hex)?;
            println!("{}", serde_json::to_string_pretty(&decoded)?);
        }
        Commands::Replay { snapshot, config } => {
            let config = match config {
                Some(path) => ProcessingConfig::from_json_file(&path)?,
                None => ProcessingConfig::default(),
            };
            let json = fs::read_to_string(&snapshot)
                .with_context(|| format!("reading {}", snapshot.display()))?;
            let snapshot: StoreSnapshot =
                serde_json::from_str(&json).context("parsing store snapshot")?;

            let store = MemoryStore::from_snapshot(snapshot);
            let summary = process_backlog(&store, &store, config)?;
            log_info(&format!(
                "Processed {} message(s) for {} device(s)",
                summary.messages.len(),
                summary.devices
            ));

            let output = ReplayOutput {
                summary,
                store: store.report(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}
