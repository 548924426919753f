//! Temporary module directories

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hotswap_runtime::{RuntimeConfig, WatchBackendKind, module_file_name};
use tempfile::TempDir;

use crate::loader::FakeModule;

/// A module directory inside a fresh temporary directory
#[derive(Debug)]
pub struct ModuleDir {
    root: TempDir,
    dir: PathBuf,
}

impl ModuleDir {
    /// Create `<tmp>/mods`
    pub fn new() -> anyhow::Result<Self> {
        let root = tempfile::tempdir()?;
        let dir = root.path().join("mods");
        fs::create_dir_all(&dir)?;
        Ok(Self { root, dir })
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Parent of the module directory, for scratch files of a test
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Path of the module file for `identity`
    pub fn file(&self, identity: &str) -> PathBuf {
        self.dir.join(module_file_name(identity))
    }

    /// Write `module` as the file for `identity`, returning its file name
    pub fn install(&self, identity: &str, module: &FakeModule) -> anyhow::Result<String> {
        fs::write(self.file(identity), module.render())?;
        Ok(module_file_name(identity))
    }

    /// Rewrite the file for `identity` and push its mtime forward so
    /// snapshot backends see the change even on coarse-grained filesystems
    pub fn overwrite(&self, identity: &str, module: &FakeModule) -> anyhow::Result<String> {
        let path = self.file(identity);
        let previous = fs::metadata(&path)?.modified()?;
        fs::write(&path, module.render())?;
        let file = fs::File::options().write(true).open(&path)?;
        file.set_modified(previous + Duration::from_secs(2))?;
        Ok(module_file_name(identity))
    }

    /// Delete the file for `identity`
    pub fn remove(&self, identity: &str) -> anyhow::Result<()> {
        fs::remove_file(self.file(identity))?;
        Ok(())
    }

    /// Config watching this directory with the given backend
    pub fn config(&self, backend: WatchBackendKind) -> RuntimeConfig {
        RuntimeConfig::default()
            .with_module_dir(&self.dir)
            .with_backend(backend)
    }
}
