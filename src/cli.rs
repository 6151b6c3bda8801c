// =============================================================================
// CLI surface
// =============================================================================
//
// Two subcommands: `start` runs the full engine (scheduler + API server)
// until Ctrl+C; `reconcile` runs a single reconciliation pass against the
// venue and prints a report, for operators who want to check drift without
// booting the whole process.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "arena-engine", about = "Autonomous multi-agent trading competition engine")]
pub struct Cli {
    /// Path to the JSON config file.
    #[arg(long, env = "ARENA_CONFIG", default_value = "config.json")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the scheduler and API server.
    Start,
    /// Run a single reconciliation pass against the venue and exit.
    Reconcile,
}
