//! gset CLI
//!
//! Commands:
//!   1) replay <ops.jsonl>
//!      - Applies a JSON-lines op log to a root set of JSON members and prints
//!        the catch-up delta for a consumer at `--since`, then `generation=<g>`.
//!   2) follow <ops.jsonl>
//!      - Prints the change feed: one delta per op, relative to the generation
//!        before that op. Finishes by checking that a replica fed only those
//!        deltas matches the source.
//!
//! Op lines:
//!   {"op":"add","value":{...}}
//!   {"op":"remove","value":{...}}   or   {"op":"remove","id":<id>}
//! An optional "set":"<name>" routes the op to a subset of the root, created on
//! first use. Blank lines are ignored.
//!
//! `GSET_MAX_REMOVALS` sets the removal log bound; `--max-removals` wins over it.
//! Logging goes to stderr through `RUST_LOG`.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "gset", version, about = "Replay generational-set op logs and print catch-up deltas")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Apply an op log and print the delta a consumer at `--since` needs
    Replay {
        #[command(flatten)]
        set: SetArgs,
        /// Generation the consumer last saw
        #[arg(long, default_value_t = 0)]
        since: u64,
    },

    /// Print one delta per op and verify a replica converges
    Follow {
        #[command(flatten)]
        set: SetArgs,
    },
}

/// Options shared by every command that builds a set from an op log.
#[derive(Args, Debug, Clone)]
pub struct SetArgs {
    /// Path to a JSON-lines op log
    pub ops: PathBuf,
    /// Member field holding the id
    #[arg(long, default_value = "id")]
    pub id_field: String,
    /// Compare and emit ids as strings (keeps 64-bit integers exact downstream)
    #[arg(long)]
    pub stringify_ids: bool,
    /// Removal log bound (overrides GSET_MAX_REMOVALS)
    #[arg(long)]
    pub max_removals: Option<usize>,
    /// Print the metrics CSV after the run
    #[arg(long)]
    pub metrics: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Replay { set, since } => commands::cmd_replay(&set, since),
        Cmd::Follow { set } => commands::cmd_follow(&set),
    }
}
