//! Hot-reloadable native module runtime
//!
//! Hosts shared-library modules dropped into a directory and keeps the set of
//! loaded modules in step with the directory contents:
//! - modules are loaded at startup and whenever a new file appears
//! - a rewritten file is reloaded into the slot its predecessor occupied
//! - a removed file is unloaded
//!
//! Each module exports an init entry point returning a status and a shutdown
//! entry point; see the `hotswap-sdk` crate for the ABI and the
//! `declare_module!` macro.
//!
//! The host drives everything from one thread by calling [`Runtime::poll`]
//! periodically. Nothing happens between polls.

pub mod config;
pub mod error;
pub mod identity;
pub mod loader;
pub mod reconcile;
pub mod registry;
pub mod runtime;
pub mod staging;
pub mod watch;

pub use config::{RuntimeConfig, SymbolNames, WatchBackendKind};
pub use error::{
    IntoRuntimeReport, ModuleError, RegistryError, RuntimeError, RuntimeResult, WatchError,
};
pub use identity::{MODULE_EXTENSION, derive_identity, is_module_file, module_file_name};
pub use loader::{DylibLoader, LibraryLoader, NativeLibrary};
pub use reconcile::{ReconcilePlan, ReconcileSummary};
pub use registry::{LoadedModule, ModuleInfo, ModuleMetadata, ModuleRegistry};
pub use runtime::Runtime;
pub use staging::StagingArea;
pub use watch::{ChangeEvent, ChangeKind, WatchBackend, scan_module_files, start_backend};
