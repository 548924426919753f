//! Error types for `hotswap-runtime`.
//!
//! Per-module failures ([`ModuleError`]) are recovered by the caller: the
//! offending file is skipped and logged. Registry storage failures
//! ([`RegistryError`]) always leave the previous state intact. Setup failures
//! surface as [`RuntimeError`] wrapped in an [`error_stack::Report`] so the
//! path or phase involved travels with the error.
//!
//! ```rust,ignore
//! use hotswap_runtime::{Runtime, RuntimeConfig};
//!
//! let runtime = Runtime::init(RuntimeConfig::default())?;
//! ```

use std::path::PathBuf;

use error_stack::Report;
use thiserror::Error;

use crate::config::ConfigError;

/// Module load error types
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Failed to load library {path:?}: {reason}")]
    LibraryLoad { path: PathBuf, reason: String },

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Module init failed with status {0}")]
    InitFailure(i32),

    #[error("Module already loaded: {0}")]
    AlreadyLoaded(String),

    #[error("Slot {0} is out of range or occupied")]
    SlotUnavailable(usize),
}

/// Registry storage error types
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Out of memory growing registry to {requested} slots")]
    OutOfMemory { requested: usize },

    #[error("Registry capacity {requested} exceeds the configured limit of {limit}")]
    CapacityLimit { requested: usize, limit: usize },
}

/// Watch backend error types
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runtime-level error type.
///
/// Use [`RuntimeResult`] to carry it inside an [`error_stack::Report`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RuntimeError {
    /// Scratch directory creation, directory scan or removal failed.
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    /// The directory watch could not be started.
    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    /// Registry storage could not be resized.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The configuration is unusable.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Convenience result alias using [`error_stack::Report`].
pub type RuntimeResult<T> = Result<T, Report<RuntimeError>>;

/// Extension trait to convert fallible results into [`RuntimeResult<T>`].
pub trait IntoRuntimeReport<T> {
    /// Convert the error into a [`RuntimeError`] and wrap it in a report.
    fn into_report(self) -> RuntimeResult<T>;
}

impl<T, E> IntoRuntimeReport<T> for Result<T, E>
where
    E: Into<RuntimeError>,
{
    #[inline]
    fn into_report(self) -> RuntimeResult<T> {
        self.map_err(|e| Report::new(e.into()))
    }
}
