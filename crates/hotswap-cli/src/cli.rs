//! CLI command definitions using clap

use clap::{Parser, Subcommand, ValueEnum};
use hotswap_runtime::WatchBackendKind;
use std::path::PathBuf;

/// Hotswap - host a directory of hot-reloadable native modules
#[derive(Parser)]
#[command(name = "hotswap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Configuration file path
    #[arg(short = 'c', long, global = true, env = "HOTSWAP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Module directory to watch
    #[arg(short = 'd', long, global = true)]
    pub dir: Option<PathBuf>,

    /// Name of the scratch subdirectory inside the module directory
    #[arg(long = "scratch-name", global = true)]
    pub scratch_name: Option<String>,

    /// Watch backend
    #[arg(long, global = true, value_enum)]
    pub backend: Option<BackendArg>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Load the module directory and follow changes until interrupted
    Run {
        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },

    /// Load the module directory once and print the loaded modules as JSON
    List,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Watch backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    Auto,
    EventStream,
    SnapshotNotify,
    SnapshotRescan,
}

impl From<BackendArg> for WatchBackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Auto => Self::Auto,
            BackendArg::EventStream => Self::EventStream,
            BackendArg::SnapshotNotify => Self::SnapshotNotify,
            BackendArg::SnapshotRescan => Self::SnapshotRescan,
        }
    }
}
