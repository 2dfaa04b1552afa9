//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Puff session tracker.
///
/// Records timestamped events and groups them into sessions separated by an
/// idle timeout.
#[derive(Debug, Parser)]
#[command(name = "puffs", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Record events in the current session.
    Add {
        /// Number of events to record.
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,

        /// When the events happened (ISO 8601 or relative, e.g. '5 minutes ago').
        #[arg(long)]
        at: Option<String>,
    },

    /// Remove the most recent events of the current session.
    Undo {
        /// Number of events to remove.
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
    },

    /// End the current session now.
    End,

    /// Finalize the current session if it has been idle long enough.
    ///
    /// Suitable for running periodically (e.g. from cron).
    Finalize,

    /// Show the current session and store totals.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List sessions, newest first.
    Sessions {
        /// Show at most this many finalized sessions.
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print stored events as JSONL.
    Events {
        /// Only events in the current session.
        #[arg(long)]
        current: bool,
    },

    /// Import timestamps (one ISO 8601 instant per line).
    Import {
        /// File to read; stdin when omitted.
        file: Option<PathBuf>,
    },

    /// Export all event timestamps.
    Export {
        /// File to write; stdout when omitted.
        file: Option<PathBuf>,
    },

    /// Rebuild all sessions from the stored events.
    Rebuild,
}
