use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// clobsync - keep local files in sync with database CLOB columns
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Optional log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Session configuration file
    #[arg(long, short, value_name = "FILE", default_value = "clobsync.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch the configured root and sync changes until interrupted
    Watch,

    /// Push a local file to its existing database row
    Push {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Create a new database row from a local file
    Insert {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Overwrite a local file with the content of its database row
    ///
    /// The current local file is backed up first.
    Download {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Show which files exist locally, remotely or both
    Status {
        /// Only show files under this directory (default: the whole root)
        #[arg(value_name = "DIRECTORY")]
        directory: Option<PathBuf>,
    },

    /// List the backups of a file, newest first
    Backups {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Restore a file from a backup
    Restore {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Backup to restore, as numbered by `backups` (1 = newest)
        #[arg(long = "backup", value_name = "N")]
        number: usize,

        /// Don't prompt for confirmation
        #[arg(long)]
        force: bool,
    },

    /// Delete backups older than the retention window
    Purge {
        /// Override the configured retention in days
        #[arg(long, value_name = "DAYS")]
        older_than_days: Option<u64>,
    },
}
