//! Scratch directory for module working copies
//!
//! Modules are never opened straight from the watched directory. Each load
//! copies the source file into its own generation directory first, so the
//! host filesystem can rewrite the source while a handle to the previous copy
//! is still open, and a reload never truncates a mapped file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Owns the scratch directory
#[derive(Debug)]
pub struct StagingArea {
    root: PathBuf,
    generation: u64,
}

impl StagingArea {
    /// Create the scratch directory, clearing any leftovers from a previous
    /// run.
    ///
    /// An existing directory is only cleared if it holds nothing but
    /// generation directories; anything else fails with `AlreadyExists`.
    pub fn prepare<P: Into<PathBuf>>(root: P) -> io::Result<Self> {
        let root = root.into();

        if root.exists() {
            if !is_scratch_area(&root)? {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists and is not a scratch directory", root.display()),
                ));
            }
            debug!("Clearing stale scratch directory: {:?}", root);
            fs::remove_dir_all(&root)?;
        }
        fs::create_dir_all(&root)?;

        Ok(Self {
            root,
            generation: 0,
        })
    }

    /// Scratch directory path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy `source` into a fresh generation directory.
    ///
    /// The staged copy keeps the source's file name.
    pub fn stage(&mut self, source: &Path) -> io::Result<PathBuf> {
        let file_name = source.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no file name", source.display()),
            )
        })?;

        self.generation += 1;
        let dir = self.root.join(format!("g{}", self.generation));
        fs::create_dir_all(&dir)?;

        let staged = dir.join(file_name);
        if let Err(e) = fs::copy(source, &staged) {
            let _ = fs::remove_dir_all(&dir);
            return Err(e);
        }

        debug!("Staged {:?} as {:?}", source, staged);
        Ok(staged)
    }

    /// Remove a staged copy and its generation directory.
    pub fn discard(&self, staged: &Path) {
        let Some(dir) = staged.parent() else {
            return;
        };
        if dir.parent() != Some(self.root.as_path()) {
            warn!("Refusing to discard {:?}: not inside {:?}", staged, self.root);
            return;
        }

        if let Err(e) = fs::remove_dir_all(dir) {
            warn!("Failed to discard staged copy {:?}: {}", staged, e);
        }
    }

    /// Remove the whole scratch directory.
    pub fn remove(self) -> io::Result<()> {
        match fs::remove_dir_all(&self.root) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Check if `root` is a directory holding only `g<N>` subdirectories
fn is_scratch_area(root: &Path) -> io::Result<bool> {
    if !fs::symlink_metadata(root)?.is_dir() {
        return Ok(false);
    }

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name();
        let is_generation = name
            .to_str()
            .and_then(|name| name.strip_prefix('g'))
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()));
        if !is_generation || !entry.file_type()?.is_dir() {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Calculate the SHA-256 digest of a file, hex encoded
pub fn file_digest(path: &Path) -> io::Result<String> {
    let contents = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Ok(format!("{:x}", hasher.finalize()))
}
