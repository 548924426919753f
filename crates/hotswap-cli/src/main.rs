//! Hotswap CLI - host a directory of hot-reloadable native modules

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, LogFormat};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_format);

    let config = commands::resolve_config(&cli)?;

    match cli.command {
        Commands::Run { interval_ms } => commands::run::run(config, interval_ms),
        Commands::List => commands::list::run(config),
    }
}

/// Initialize logging
///
/// `RUST_LOG` wins over the verbosity flag. Logs go to stderr so command
/// output on stdout stays machine readable.
fn init_logging(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
