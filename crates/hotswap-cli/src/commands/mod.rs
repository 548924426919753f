//! Command implementations

pub mod list;
pub mod run;

use anyhow::Context;
use error_stack::Report;
use hotswap_runtime::{RuntimeConfig, RuntimeError};

use crate::cli::Cli;

/// Prefix for environment overrides of file configuration
pub const ENV_PREFIX: &str = "HOTSWAP";

/// Build the runtime configuration.
///
/// File values (with environment overrides) come first, command-line flags
/// replace them.
pub fn resolve_config(cli: &Cli) -> anyhow::Result<RuntimeConfig> {
    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::load_with_env(path, ENV_PREFIX)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => RuntimeConfig::default(),
    };

    if let Some(dir) = &cli.dir {
        config.module_dir = dir.clone();
    }
    if let Some(name) = &cli.scratch_name {
        config.scratch_dir_name = name.clone();
    }
    if let Some(backend) = cli.backend {
        config.backend = backend.into();
    }

    Ok(config)
}

/// Flatten a runtime report into an `anyhow` error, keeping its attachments.
pub fn report_to_anyhow(report: Report<RuntimeError>) -> anyhow::Error {
    anyhow::anyhow!("{report:?}")
}
