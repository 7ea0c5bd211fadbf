use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "rosie")]
#[command(about = "Event-sourced cleanup planner", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Walk a directory tree and record it in the event log
    Scan {
        root: PathBuf,
        /// Comma-separated include globs (overrides configuration)
        #[arg(long)]
        include: Option<String>,
        /// Comma-separated exclude globs (overrides configuration)
        #[arg(long)]
        exclude: Option<String>,
    },
    /// Run one incremental scheduler pass
    Run,
    /// Keep running scheduler passes until Enter is pressed
    Watch,
    /// Materialize the current plan
    Plan {
        /// Write the plan JSON to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
        /// Also record a PlanProposed event for the plan
        #[arg(long)]
        propose: bool,
    },
    /// Record a correction against a plan
    Correct {
        #[arg(long)]
        plan_id: String,
        #[arg(long)]
        note: String,
        /// Paths the correction is about; may be repeated
        #[arg(long = "path")]
        paths: Vec<PathBuf>,
    },
    /// Finalize the current plan if its id matches
    Approve {
        #[arg(long)]
        plan_id: String,
    },
    /// List recorded events
    Events {
        /// Only events with an id greater than this
        #[arg(long, default_value_t = 0)]
        since: i64,
    },
    /// Verify every event checksum
    Audit,
    /// Print configuration values
    PrintConfig,
}

/// Split a comma-separated pattern list, dropping empty entries.
pub fn split_patterns(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
