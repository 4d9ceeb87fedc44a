//! CareSync CLI
//!
//! Command-line tools for CareSync record stores.
//!
//! # Commands
//!
//! - `inspect` - Display record and change counts
//! - `pending` - List squashed pending changes
//! - `dump-journal` - Dump journal frames for debugging
//! - `compact` - Rewrite the journal as one snapshot

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// CareSync command-line store tools.
#[derive(Parser)]
#[command(name = "caresync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store journal file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display record and change counts
    Inspect {
        /// Show per-type counts
        #[arg(short, long)]
        types: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List squashed pending changes as JSON
    Pending {
        /// Only records of this type
        #[arg(short = 't', long = "type")]
        record_type: Option<String>,

        /// Maximum number of records to list
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Dump journal frames for debugging
    DumpJournal {
        /// Maximum number of frames to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Rewrite the journal as one snapshot frame
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { types, format } => {
            let path = cli.path.ok_or("Journal path required for inspect")?;
            commands::inspect::run(&path, types, &format)?;
        }
        Commands::Pending { record_type, limit } => {
            let path = cli.path.ok_or("Journal path required for pending")?;
            commands::pending::run(&path, record_type.as_deref(), limit)?;
        }
        Commands::DumpJournal { limit, format } => {
            let path = cli.path.ok_or("Journal path required for dump-journal")?;
            commands::dump_journal::run(&path, limit, &format)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Journal path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Version => {
            println!("CareSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
