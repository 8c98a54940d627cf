//! cdfsync CLI
//!
//! Maintenance tools for the import ledger.
//!
//! # Commands
//!
//! - `inspect` - Display ledger statistics and records
//! - `verify` - Verify ledger frame integrity
//! - `compact` - Rewrite the ledger with one frame per live record
//! - `purge` - Forget every tracked import
//! - `forget` - Forget individual entities
//! - `auto-update` - Enable or disable automatic updates for an entity

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// cdfsync import ledger tools.
#[derive(Parser)]
#[command(name = "cdfsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the ledger file
    #[arg(global = true, short, long)]
    ledger: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display ledger statistics and records
    Inspect {
        /// Only show records with this status (queued, imported, auto_update_disabled)
        #[arg(short, long)]
        status: Option<String>,

        /// Maximum number of records to show
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify ledger frame integrity
    Verify,

    /// Rewrite the ledger with one frame per live record
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// Forget every tracked import
    Purge {
        /// Confirm the purge
        #[arg(long)]
        yes: bool,
    },

    /// Forget individual entities
    Forget {
        /// Entity uuids to forget
        #[arg(required = true)]
        uuids: Vec<String>,
    },

    /// Enable or disable automatic updates for an entity
    AutoUpdate {
        /// Entity uuid
        uuid: String,

        /// Protect local edits from re-imports
        #[arg(long, conflicts_with = "enable")]
        disable: bool,

        /// Allow re-imports again
        #[arg(long)]
        enable: bool,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect {
            status,
            limit,
            format,
        } => {
            let path = cli.ledger.ok_or("Ledger path required for inspect")?;
            commands::inspect::run(&path, status.as_deref(), limit, &format)?;
        }
        Commands::Verify => {
            let path = cli.ledger.ok_or("Ledger path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.ledger.ok_or("Ledger path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Purge { yes } => {
            let path = cli.ledger.ok_or("Ledger path required for purge")?;
            commands::admin::purge(&path, yes)?;
        }
        Commands::Forget { uuids } => {
            let path = cli.ledger.ok_or("Ledger path required for forget")?;
            commands::admin::forget(&path, &uuids)?;
        }
        Commands::AutoUpdate {
            uuid,
            disable,
            enable,
        } => {
            let path = cli.ledger.ok_or("Ledger path required for auto-update")?;
            if disable == enable {
                return Err("Pass exactly one of --enable or --disable".into());
            }
            commands::admin::set_auto_update(&path, &uuid, enable)?;
        }
        Commands::Version => {
            println!("cdfsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Ledger format v{}", cdfsync_tracker::LEDGER_VERSION);
        }
    }

    Ok(())
}
