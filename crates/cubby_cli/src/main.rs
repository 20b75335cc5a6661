//! Cubby CLI
//!
//! Maintenance tools for Cubby store directories.
//!
//! # Commands
//!
//! - `inspect` - Display store statistics and buckets
//! - `verify` - Check every frame of the store file
//! - `compact` - Rewrite the store file to reclaim space

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Cubby command-line store tools.
#[derive(Parser)]
#[command(name = "cubby")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
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
    /// Display store statistics
    Inspect {
        /// List every bucket with its namespace
        #[arg(short, long)]
        buckets: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify store file integrity
    Verify,

    /// Compact the store file
    Compact {
        /// Write the compacted store into this directory instead
        #[arg(long)]
        dest: Option<PathBuf>,

        /// Give up after this many milliseconds (0 = no limit)
        #[arg(long, default_value = "0")]
        timeout_ms: u64,

        /// Maximum bytes of operations per rewritten frame (0 = one frame)
        #[arg(long, default_value = "65536")]
        max_txn_size: u64,

        /// Dry run - show what would be reclaimed
        #[arg(short, long)]
        dry_run: bool,
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
        Commands::Inspect { buckets, format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            let format = format.parse()?;
            commands::inspect::run(&path, buckets, format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Compact {
            dest,
            timeout_ms,
            max_txn_size,
            dry_run,
        } => {
            let path = cli.path.ok_or("Store path required for compact")?;
            let options = commands::compact::CompactOptions {
                destination: dest,
                timeout_ms,
                max_txn_size,
                dry_run,
            };
            commands::compact::run(&path, &options)?;
        }
        Commands::Version => {
            println!("Cubby CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Cubby Core v{}", cubby_core::VERSION);
        }
    }

    Ok(())
}
