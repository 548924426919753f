//! Directory watch backends
//!
//! A backend turns filesystem activity in the module directory into
//! [`ChangeEvent`]s. Checks never block: a backend either has something to
//! report or returns an empty batch.
//!
//! Two strategies are provided:
//! - [`EventStreamWatcher`] consumes a per-file notification stream and
//!   classifies each batch by file name.
//! - [`SnapshotWatcher`] keeps a `name -> mtime` map and diffs it against a
//!   fresh listing whenever its [`ChangeTrigger`] fires.

mod event_stream;
mod snapshot;

pub use event_stream::EventStreamWatcher;
pub use snapshot::{
    ChangeTrigger, DirectorySnapshot, NotifyTrigger, RescanTrigger, SnapshotWatcher,
};

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, info};

use crate::config::WatchBackendKind;
use crate::error::WatchError;
use crate::identity::is_module_file;

/// What the engine should do with a module file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    /// File appeared
    Load,
    /// File disappeared
    Unload,
    /// File was rewritten
    Reload,
}

/// A classified change to one module file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// File name relative to the module directory
    pub file_name: String,
    /// Change kind
    pub kind: ChangeKind,
}

impl ChangeEvent {
    /// Create a new change event
    pub fn new(file_name: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            file_name: file_name.into(),
            kind,
        }
    }

    pub fn load(file_name: impl Into<String>) -> Self {
        Self::new(file_name, ChangeKind::Load)
    }

    pub fn unload(file_name: impl Into<String>) -> Self {
        Self::new(file_name, ChangeKind::Unload)
    }

    pub fn reload(file_name: impl Into<String>) -> Self {
        Self::new(file_name, ChangeKind::Reload)
    }
}

/// A running directory watch
///
/// Dropping the backend stops the watch.
pub trait WatchBackend {
    /// Collect changes since the previous check.
    ///
    /// `loaded` holds the identities currently live in the registry.
    fn check(&mut self, loaded: &[&str]) -> Vec<ChangeEvent>;

    /// Which strategy this backend implements
    fn kind(&self) -> WatchBackendKind;

    /// Stop watching. Later checks return nothing.
    fn stop(&mut self) {}
}

/// Start the backend selected by `kind` on `dir`.
///
/// [`WatchBackendKind::Auto`] resolves to the platform default.
pub fn start_backend(
    kind: WatchBackendKind,
    dir: &Path,
    verify_readable: bool,
) -> Result<Box<dyn WatchBackend>, WatchError> {
    let kind = kind.resolve();
    info!("Starting {} watch on {:?}", kind, dir);

    let backend: Box<dyn WatchBackend> = match kind {
        WatchBackendKind::EventStream => Box::new(EventStreamWatcher::start(dir, verify_readable)?),
        WatchBackendKind::SnapshotRescan => Box::new(SnapshotWatcher::start(
            dir,
            RescanTrigger,
            verify_readable,
        )?),
        WatchBackendKind::SnapshotNotify | WatchBackendKind::Auto => Box::new(
            SnapshotWatcher::start(dir, NotifyTrigger::start(dir)?, verify_readable)?,
        ),
    };

    Ok(backend)
}

/// List module file names of regular files in `dir`, sorted.
///
/// Symlinks are followed; a dangling link is skipped.
pub fn scan_module_files(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            debug!("Skipping non UTF-8 file name in {:?}", dir);
            continue;
        };
        if !is_module_file(&name) {
            continue;
        }
        match fs::metadata(entry.path()) {
            Ok(metadata) if metadata.is_file() => names.push(name),
            Ok(_) => {}
            Err(e) => debug!("Skipping {}: {}", name, e),
        }
    }

    names.sort();
    Ok(names)
}

/// Check if `path` can be opened for reading
pub(crate) fn is_readable(path: &Path) -> io::Result<()> {
    fs::File::open(path).map(drop)
}

/// Decides whether a module file is ready to be loaded
pub(crate) type ReadinessCheck = Box<dyn Fn(&Path) -> io::Result<()> + Send>;

pub(crate) fn readiness_check(verify_readable: bool) -> Option<ReadinessCheck> {
    verify_readable.then(|| Box::new(is_readable) as ReadinessCheck)
}
