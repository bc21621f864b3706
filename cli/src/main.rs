use std::fs;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use quill_kernel::actions::{Action, Protocol, TableMetadata};
use quill_kernel::guards::{CommitContext, GuardEngine};
use quill_kernel::log::LogSegment;
use quill_kernel::snapshot::Snapshot;

/// Quill table-format kernel CLI
#[derive(Parser, Debug)]
#[command(name = "quill")]
#[command(about = "Inspect and validate transactional table logs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay a resolved log segment and print the reconstructed state
    Replay {
        /// Path to a log segment JSON file
        #[arg(long)]
        segment: String,

        /// Timestamp (epoch millis) anchoring retention expiry;
        /// defaults to the wall clock
        #[arg(long)]
        at_millis: Option<i64>,
    },

    /// Run the pre-commit guards against a proposed commit
    CheckCommit {
        /// Path to the current table metadata JSON
        #[arg(long)]
        current: String,

        /// Path to the proposed table metadata JSON
        #[arg(long)]
        proposed: String,

        /// Path to the current protocol JSON
        #[arg(long)]
        protocol: String,

        /// Path to the proposed actions JSON (array); empty if omitted
        #[arg(long)]
        actions: Option<String>,
    },
}

/// Wrapper for JSON output of `replay`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReplayOutput {
    version: u64,
    num_files: usize,
    total_file_size: i64,
    num_tombstones: usize,
    column_mapping_mode: String,
    transactions: serde_json::Value,
    domains: Vec<String>,
    protocol: serde_json::Value,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {path}"))
}

fn replay(segment_path: &str, at_millis: Option<i64>) -> Result<()> {
    let segment: LogSegment = read_json(segment_path)?;
    let version = segment.version().context("segment is empty")?;

    let mut snapshot = Snapshot::new(version, segment);
    if let Some(now) = at_millis {
        snapshot = snapshot.with_reconstruction_time(now);
    }

    let state = snapshot.state()?;
    let output = ReplayOutput {
        version,
        num_files: state.num_files(),
        total_file_size: state.total_file_size(),
        num_tombstones: state.tombstones.len(),
        column_mapping_mode: state.metadata.column_mapping_mode()?.to_string(),
        transactions: serde_json::to_value(&state.transactions)?,
        domains: state.domains.keys().cloned().collect(),
        protocol: serde_json::to_value(&state.protocol)?,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn check_commit(
    current: &str,
    proposed: &str,
    protocol: &str,
    actions: Option<&str>,
) -> Result<()> {
    let current: TableMetadata = read_json(current)?;
    let proposed: TableMetadata = read_json(proposed)?;
    let protocol: Protocol = read_json(protocol)?;
    let actions: Vec<Action> = match actions {
        Some(path) => read_json(path)?,
        None => Vec::new(),
    };

    let engine = GuardEngine::with_default_guards();
    engine.evaluate(&CommitContext {
        protocol: &protocol,
        metadata: &current,
        proposed_metadata: Some(&proposed),
        actions: &actions,
    })?;

    println!("{}", serde_json::json!({ "ok": true }));
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Replay { segment, at_millis } => replay(&segment, at_millis),
        Command::CheckCommit {
            current,
            proposed,
            protocol,
            actions,
        } => check_commit(
            &current,
            &proposed,
            &protocol,
            actions.as_deref(),
        ),
    }
}
