//! Runtime configuration
//!
//! [`RuntimeConfig`] is consumed by [`Runtime::init`](crate::Runtime::init);
//! changing it afterwards has no effect on a running runtime. Configuration
//! can be built in code or loaded from a file:
//!
//! - Format auto-detection from the file extension (TOML, YAML, JSON)
//! - Environment variable substitution (`${VAR}` and `$VAR` syntax)
//! - Environment overrides with a prefix (`HOTSWAP_MODULE_DIR`, ...)

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use config::{Config as Cfg, Environment, File, FileFormat};
use hotswap_sdk::{
    DEFAULT_DESCRIPTION_SYMBOL, DEFAULT_INIT_SYMBOL, DEFAULT_NAME_SYMBOL,
    DEFAULT_SHUTDOWN_SYMBOL, DEFAULT_VERSION_SYMBOL,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::identity::is_module_file;

/// Configuration error types
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Names of the symbols resolved in every module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct SymbolNames {
    /// Mandatory `() -> status` entry point
    pub init: String,
    /// Mandatory `()` entry point
    pub shutdown: String,
    /// Optional display-name accessor
    pub name: String,
    /// Optional version accessor
    pub version: String,
    /// Optional description accessor
    pub description: String,
}

impl Default for SymbolNames {
    fn default() -> Self {
        Self {
            init: DEFAULT_INIT_SYMBOL.to_string(),
            shutdown: DEFAULT_SHUTDOWN_SYMBOL.to_string(),
            name: DEFAULT_NAME_SYMBOL.to_string(),
            version: DEFAULT_VERSION_SYMBOL.to_string(),
            description: DEFAULT_DESCRIPTION_SYMBOL.to_string(),
        }
    }
}

/// Watch backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchBackendKind {
    /// Event stream on Linux and Android, snapshot + notify elsewhere
    #[default]
    Auto,
    /// Classify discrete create/write/delete/rename notifications
    EventStream,
    /// Re-list the directory whenever the OS signals a change
    SnapshotNotify,
    /// Re-list the directory on every poll
    SnapshotRescan,
}

impl WatchBackendKind {
    /// Resolve [`WatchBackendKind::Auto`] for the current platform.
    pub fn resolve(self) -> Self {
        match self {
            Self::Auto if cfg!(any(target_os = "linux", target_os = "android")) => {
                Self::EventStream
            }
            Self::Auto => Self::SnapshotNotify,
            other => other,
        }
    }
}

impl std::fmt::Display for WatchBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::EventStream => "event_stream",
            Self::SnapshotNotify => "snapshot_notify",
            Self::SnapshotRescan => "snapshot_rescan",
        };
        f.write_str(name)
    }
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct RuntimeConfig {
    /// Watched directory
    pub module_dir: PathBuf,
    /// Name of the staging subdirectory inside `module_dir`
    pub scratch_dir_name: String,
    /// Entry point and accessor names
    pub symbols: SymbolNames,
    /// Watch backend
    pub backend: WatchBackendKind,
    /// Check that a changed file can be opened before reporting it
    pub verify_readable: bool,
    /// Upper bound on registry capacity
    pub max_modules: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            module_dir: PathBuf::from("mods"),
            scratch_dir_name: ".tmp".to_string(),
            symbols: SymbolNames::default(),
            backend: WatchBackendKind::Auto,
            verify_readable: true,
            max_modules: None,
        }
    }
}

impl RuntimeConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the watched directory
    pub fn with_module_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.module_dir = dir.into();
        self
    }

    /// Set the staging subdirectory name
    ///
    /// An existing directory of that name is cleared at startup only if it
    /// holds nothing but staging leftovers.
    pub fn with_scratch_dir_name(mut self, name: &str) -> Self {
        self.scratch_dir_name = name.to_string();
        self
    }

    /// Set the symbol names
    pub fn with_symbols(mut self, symbols: SymbolNames) -> Self {
        self.symbols = symbols;
        self
    }

    /// Set the watch backend
    pub fn with_backend(mut self, backend: WatchBackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Enable/disable the readiness check
    pub fn with_verify_readable(mut self, enabled: bool) -> Self {
        self.verify_readable = enabled;
        self
    }

    /// Set the registry capacity limit
    pub fn with_max_modules(mut self, max: usize) -> Self {
        self.max_modules = Some(max);
        self
    }

    /// Full path of the staging directory
    pub fn scratch_dir(&self) -> PathBuf {
        self.module_dir.join(&self.scratch_dir_name)
    }

    /// Check the configuration for values the runtime cannot work with
    pub fn validate(&self) -> ConfigResult<()> {
        let mut components = Path::new(&self.scratch_dir_name).components();
        let single_normal = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single_normal {
            return Err(ConfigError::Invalid(format!(
                "scratch_dir_name must be a single directory name, got {:?}",
                self.scratch_dir_name
            )));
        }
        if is_module_file(&self.scratch_dir_name) {
            return Err(ConfigError::Invalid(format!(
                "scratch_dir_name {:?} looks like a module file",
                self.scratch_dir_name
            )));
        }

        let symbols = [
            ("init", &self.symbols.init),
            ("shutdown", &self.symbols.shutdown),
            ("name", &self.symbols.name),
            ("version", &self.symbols.version),
            ("description", &self.symbols.description),
        ];
        for (field, value) in symbols {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "symbols.{field} must not be empty"
                )));
            }
        }

        if self.max_modules == Some(0) {
            return Err(ConfigError::Invalid(
                "max_modules must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let format = detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        from_str(&content, format)
    }

    /// Load configuration from a file with environment variable overrides
    ///
    /// Variables are prefixed with `env_prefix` and use `__` for nesting,
    /// e.g. `HOTSWAP_SYMBOLS__INIT`.
    pub fn load_with_env<P: AsRef<Path>>(path: P, env_prefix: &str) -> ConfigResult<Self> {
        let path = path.as_ref();
        let format = detect_format(path)?;
        let content = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&content);

        let config = Cfg::builder()
            .add_source(File::from_str(&substituted, format))
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| ConfigError::Serialization(e.to_string()))
    }
}

/// Detect configuration format from file extension
///
/// Supported: `.toml`, `.yaml`/`.yml`, `.json`, `.ini`, `.ron`, `.json5`.
pub fn detect_format<P: AsRef<Path>>(path: P) -> ConfigResult<FileFormat> {
    let ext = path
        .as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "ini" => Ok(FileFormat::Ini),
        "ron" => Ok(FileFormat::Ron),
        "json5" => Ok(FileFormat::Json5),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

static BRACED_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("braced env var pattern is valid")
});

static SIMPLE_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").expect("simple env var pattern is valid")
});

/// Substitute environment variables in a string
///
/// Supports `${VAR_NAME}` and `$VAR_NAME`. Unknown variables are left as
/// written.
pub fn substitute_env_vars(content: &str) -> String {
    let braced = BRACED_VAR.replace_all(content, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    });

    SIMPLE_VAR
        .replace_all(&braced, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

/// Load configuration from a string with explicit format
pub fn from_str(content: &str, format: FileFormat) -> ConfigResult<RuntimeConfig> {
    let substituted = substitute_env_vars(content);

    let config = Cfg::builder()
        .add_source(File::from_str(&substituted, format))
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}
