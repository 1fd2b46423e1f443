//! BucketDB CLI
//!
//! Command-line tools for BucketDB store maintenance.
//!
//! # Commands
//!
//! - `inspect` - Display store statistics and metadata
//! - `verify` - Replay the store file and check its integrity
//! - `backup` / `restore` - Copy the store out and back in
//! - `compact` - Rewrite the store with only live records
//! - `export` - Dump every bucket as JSON
//! - `encrypt` - Seal a plaintext store with a key

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// BucketDB command-line store tools.
#[derive(Parser)]
#[command(name = "bucketdb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Encryption key of the store
    #[arg(global = true, short, long)]
    key: Option<String>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display store statistics and metadata
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Verify store integrity without opening it for writing
    Verify {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Copy the store to a backup file
    Backup {
        /// Backup file to write
        output: PathBuf,
    },

    /// Replace the store with a backup file
    Restore {
        /// Backup file to read
        input: PathBuf,
    },

    /// Rewrite the store to reclaim space
    Compact,

    /// Export every bucket as JSON
    Export {
        /// JSON file to write
        output: PathBuf,
    },

    /// Encrypt a plaintext store with --key
    Encrypt,

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

    let key = cli.key.as_deref();
    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Store path required for inspect")?;
            commands::inspect::run(&path, key, &format)?;
        }
        Commands::Verify { format } => {
            let path = cli.path.ok_or("Store path required for verify")?;
            commands::verify::run(&path, &format)?;
        }
        Commands::Backup { output } => {
            let path = cli.path.ok_or("Store path required for backup")?;
            commands::backup::create(&path, key, &output)?;
        }
        Commands::Restore { input } => {
            let path = cli.path.ok_or("Store path required for restore")?;
            commands::backup::restore(&path, key, &input)?;
        }
        Commands::Compact => {
            let path = cli.path.ok_or("Store path required for compact")?;
            commands::compact::run(&path, key)?;
        }
        Commands::Export { output } => {
            let path = cli.path.ok_or("Store path required for export")?;
            commands::export::run(&path, key, &output)?;
        }
        Commands::Encrypt => {
            let path = cli.path.ok_or("Store path required for encrypt")?;
            let key = key.ok_or("--key required for encrypt")?;
            commands::encrypt::run(&path, key)?;
        }
        Commands::Version => {
            println!("BucketDB CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("BucketDB Core v{}", bucketdb_core::VERSION);
        }
    }

    Ok(())
}
