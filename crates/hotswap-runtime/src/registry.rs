//! Module registry
//!
//! Owns the slot storage for live modules. A slot is either empty or holds
//! one [`LoadedModule`], which carries the library handle together with both
//! mandatory entry points; there is no partially loaded state.
//!
//! Slot indices are the only addresses handed out. Lookup by identity is a
//! linear scan, which stays cheap because the reconciliation engine keeps
//! live slots dense.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SymbolNames;
use crate::error::{ModuleError, RegistryError};
use crate::identity::{derive_identity, truncate_on_char_boundary};
use crate::loader::{LibraryLoader, NativeLibrary, ShutdownFn};
use crate::staging::file_digest;

/// Maximum metadata name length in bytes
pub const NAME_MAX_LEN: usize = 63;
/// Maximum metadata version length in bytes
pub const VERSION_MAX_LEN: usize = 31;
/// Maximum metadata description length in bytes
pub const DESCRIPTION_MAX_LEN: usize = 255;

/// Optional self-reported module metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleMetadata {
    /// Display name
    pub name: Option<String>,
    /// Version string
    pub version: Option<String>,
    /// Description
    pub description: Option<String>,
}

impl ModuleMetadata {
    /// Check if the module reported nothing
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.version.is_none() && self.description.is_none()
    }
}

/// A live module occupying one slot
pub struct LoadedModule {
    identity: String,
    instance_id: Uuid,
    staged_path: PathBuf,
    digest: Option<String>,
    loaded_at: SystemTime,
    metadata: Option<ModuleMetadata>,
    // Declared before `library` so the entry point drops first.
    shutdown: ShutdownFn,
    library: Box<dyn NativeLibrary>,
}

impl LoadedModule {
    /// Module identity
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Id of this particular load; a reload produces a new one
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// The scratch copy the library was opened from
    pub fn staged_path(&self) -> &Path {
        &self.staged_path
    }

    /// SHA-256 of the staged file, if it could be read
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// When the module was loaded
    pub fn loaded_at(&self) -> SystemTime {
        self.loaded_at
    }

    /// Self-reported metadata, if the module exports any
    pub fn metadata(&self) -> Option<&ModuleMetadata> {
        self.metadata.as_ref()
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("identity", &self.identity)
            .field("instance_id", &self.instance_id)
            .field("staged_path", &self.staged_path)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Read-only view of a live module
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    pub slot: usize,
    pub identity: String,
    pub instance_id: Uuid,
    pub name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub digest: Option<String>,
    pub staged_path: PathBuf,
    pub loaded_at: SystemTime,
}

impl ModuleInfo {
    fn new(slot: usize, module: &LoadedModule) -> Self {
        let metadata = module.metadata.clone().unwrap_or_default();
        Self {
            slot,
            identity: module.identity.clone(),
            instance_id: module.instance_id,
            name: metadata.name,
            version: metadata.version,
            description: metadata.description,
            digest: module.digest.clone(),
            staged_path: module.staged_path.clone(),
            loaded_at: module.loaded_at,
        }
    }
}

/// Slot storage for live modules
pub struct ModuleRegistry<L> {
    loader: L,
    symbols: SymbolNames,
    slots: Vec<Option<LoadedModule>>,
    live: usize,
    capacity_limit: Option<usize>,
}

impl<L: LibraryLoader> ModuleRegistry<L> {
    /// Create an empty registry with no capacity
    pub fn new(loader: L, symbols: SymbolNames) -> Self {
        Self {
            loader,
            symbols,
            slots: Vec::new(),
            live: 0,
            capacity_limit: None,
        }
    }

    /// Refuse to grow beyond `limit` slots
    pub fn with_capacity_limit(mut self, limit: Option<usize>) -> Self {
        self.capacity_limit = limit;
        self
    }

    /// Allocate `capacity` empty slots.
    ///
    /// Any modules still loaded are unloaded first.
    pub fn initialize(&mut self, capacity: usize) -> Result<(), RegistryError> {
        if self.live > 0 {
            warn!("Re-initializing registry with {} live modules", self.live);
            self.unload_all();
        }
        self.slots = Vec::new();
        self.resize(capacity)
    }

    /// Grow or shrink slot storage.
    ///
    /// Slots below `new_capacity` keep their index. A live module in a
    /// truncated slot is unloaded. Growth failure leaves the registry as it
    /// was.
    pub fn resize(&mut self, new_capacity: usize) -> Result<(), RegistryError> {
        let current = self.slots.len();

        if new_capacity > current {
            if let Some(limit) = self.capacity_limit {
                if new_capacity > limit {
                    return Err(RegistryError::CapacityLimit {
                        requested: new_capacity,
                        limit,
                    });
                }
            }
            self.slots
                .try_reserve_exact(new_capacity - current)
                .map_err(|_| RegistryError::OutOfMemory {
                    requested: new_capacity,
                })?;
            self.slots.resize_with(new_capacity, || None);
            debug!("Registry grown from {} to {} slots", current, new_capacity);
            return Ok(());
        }

        if new_capacity < current {
            for slot in (new_capacity..current).rev() {
                if self.slots[slot].is_some() {
                    warn!("Slot {} truncated by resize, unloading its module", slot);
                    self.unload(slot);
                }
            }
            if new_capacity == 0 {
                self.slots = Vec::new();
            } else {
                self.slots.truncate(new_capacity);
                self.slots.shrink_to_fit();
            }
            debug!("Registry shrunk from {} to {} slots", current, new_capacity);
        }

        Ok(())
    }

    /// Load the module at `path` into `slot`.
    ///
    /// The slot must be in range and empty, and no other slot may hold the
    /// same identity. On any failure the slot stays empty and the library
    /// handle is released.
    pub fn load(&mut self, path: &Path, slot: usize) -> Result<&LoadedModule, ModuleError> {
        if !matches!(self.slots.get(slot), Some(None)) {
            return Err(ModuleError::SlotUnavailable(slot));
        }

        let identity = derive_identity(path);
        if self.find_by_identity(&identity).is_some() {
            return Err(ModuleError::AlreadyLoaded(identity));
        }

        let library = self.loader.load_library(path)?;

        let init = library
            .init_entry(&self.symbols.init)
            .ok_or_else(|| ModuleError::SymbolNotFound(self.symbols.init.clone()))?;
        let shutdown = library
            .shutdown_entry(&self.symbols.shutdown)
            .ok_or_else(|| ModuleError::SymbolNotFound(self.symbols.shutdown.clone()))?;

        let status = init();
        if status != hotswap_sdk::INIT_SUCCESS {
            return Err(ModuleError::InitFailure(status));
        }

        let metadata = self.read_metadata(library.as_ref());
        let digest = file_digest(path).ok();

        let module = LoadedModule {
            identity,
            instance_id: Uuid::now_v7(),
            staged_path: path.to_path_buf(),
            digest,
            loaded_at: SystemTime::now(),
            metadata,
            shutdown,
            library,
        };

        info!(
            "Loaded module {} into slot {} ({})",
            module.identity, slot, module.instance_id
        );

        self.live += 1;
        Ok(self.slots[slot].insert(module))
    }

    fn read_metadata(&self, library: &dyn NativeLibrary) -> Option<ModuleMetadata> {
        let fetch = |symbol: &str, max: usize| {
            let accessor = library.metadata_entry(symbol)?;
            let value = accessor()?;
            Some(truncate_on_char_boundary(&value, max).to_string())
        };

        let metadata = ModuleMetadata {
            name: fetch(&self.symbols.name, NAME_MAX_LEN),
            version: fetch(&self.symbols.version, VERSION_MAX_LEN),
            description: fetch(&self.symbols.description, DESCRIPTION_MAX_LEN),
        };

        (!metadata.is_empty()).then_some(metadata)
    }
}

impl<L> ModuleRegistry<L> {
    /// Unload the module in `slot`.
    ///
    /// Calls its shutdown entry point, releases the handle and clears the
    /// slot. Returns the staged path so the caller can discard the copy; an
    /// empty or out-of-range slot returns `None`.
    pub fn unload(&mut self, slot: usize) -> Option<PathBuf> {
        let module = self.slots.get_mut(slot)?.take()?;
        self.live -= 1;

        (module.shutdown)();
        let LoadedModule {
            identity,
            staged_path,
            shutdown,
            library,
            ..
        } = module;
        drop(shutdown);
        drop(library);

        info!("Unloaded module {} from slot {}", identity, slot);
        Some(staged_path)
    }

    /// Unload every module, highest slot first, and release storage.
    ///
    /// Returns the staged paths of the unloaded modules.
    pub fn unload_all(&mut self) -> Vec<PathBuf> {
        let staged = (0..self.slots.len())
            .rev()
            .filter_map(|slot| self.unload(slot))
            .collect();
        self.slots = Vec::new();
        staged
    }

    /// Find the slot holding `identity`
    pub fn find_by_identity(&self, identity: &str) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.as_ref().is_some_and(|module| module.identity == identity)
        })
    }

    /// Check if any empty slot sits below a live one
    pub fn has_holes(&self) -> bool {
        match self.slots.iter().rposition(Option::is_some) {
            Some(last) => last + 1 != self.live,
            None => false,
        }
    }

    /// Shift live slots down over holes, keeping their relative order.
    pub fn compact(&mut self) {
        let mut write = 0;
        for read in 0..self.slots.len() {
            if self.slots[read].is_some() {
                if read != write {
                    self.slots.swap(write, read);
                }
                write += 1;
            }
        }
        debug_assert_eq!(write, self.live);
    }

    /// Number of live modules
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Module in `slot`, if any
    pub fn get(&self, slot: usize) -> Option<&LoadedModule> {
        self.slots.get(slot)?.as_ref()
    }

    /// Identities of live modules, in slot order
    pub fn identities(&self) -> Vec<&str> {
        self.iter().map(|(_, module)| module.identity()).collect()
    }

    /// Iterate over `(slot, module)` pairs of live slots
    pub fn iter(&self) -> impl Iterator<Item = (usize, &LoadedModule)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, module)| module.as_ref().map(|m| (slot, m)))
    }

    /// Snapshot of every live module
    pub fn infos(&self) -> Vec<ModuleInfo> {
        self.iter()
            .map(|(slot, module)| ModuleInfo::new(slot, module))
            .collect()
    }

    /// Snapshot of one live module
    pub fn info(&self, identity: &str) -> Option<ModuleInfo> {
        let slot = self.find_by_identity(identity)?;
        self.get(slot).map(|module| ModuleInfo::new(slot, module))
    }
}

impl<L> Drop for ModuleRegistry<L> {
    fn drop(&mut self) {
        if self.live > 0 {
            self.unload_all();
        }
    }
}

impl<L> std::fmt::Debug for ModuleRegistry<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("capacity", &self.slots.len())
            .field("live", &self.live)
            .field("capacity_limit", &self.capacity_limit)
            .finish_non_exhaustive()
    }
}
