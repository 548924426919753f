//! Dynamic library loading
//!
//! The registry never talks to the platform loader directly. It goes through
//! [`LibraryLoader`], which opens a library, and [`NativeLibrary`], which
//! resolves entry points from an open library. [`DylibLoader`] is the
//! production implementation on top of `libloading`; tests substitute their
//! own.
//!
//! Resolved entry points are owned closures. A closure resolved from a
//! library must not outlive it: [`LoadedModule`](crate::registry::LoadedModule)
//! keeps both together and drops the entry points first.

use std::ffi::{CStr, c_int};
use std::path::Path;

use hotswap_sdk::{InitEntry, MetadataEntry, ShutdownEntry};
use libloading::Library;
use tracing::debug;

use crate::error::ModuleError;

/// Resolved `() -> status` entry point
pub type InitFn = Box<dyn Fn() -> i32>;
/// Resolved `()` entry point
pub type ShutdownFn = Box<dyn Fn()>;
/// Resolved `() -> string` accessor; `None` when the module returns null
pub type MetadataFn = Box<dyn Fn() -> Option<String>>;

/// An open native library
pub trait NativeLibrary {
    /// Resolve an init entry point
    fn init_entry(&self, symbol: &str) -> Option<InitFn>;

    /// Resolve a shutdown entry point
    fn shutdown_entry(&self, symbol: &str) -> Option<ShutdownFn>;

    /// Resolve an optional metadata accessor
    fn metadata_entry(&self, symbol: &str) -> Option<MetadataFn>;
}

/// Opens native libraries
pub trait LibraryLoader {
    /// Open the library at `path`.
    ///
    /// Dropping the returned value releases the handle.
    fn load_library(&self, path: &Path) -> Result<Box<dyn NativeLibrary>, ModuleError>;
}

/// `libloading`-backed loader
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibLoader;

impl DylibLoader {
    /// Create a new loader
    pub fn new() -> Self {
        Self
    }
}

impl LibraryLoader for DylibLoader {
    fn load_library(&self, path: &Path) -> Result<Box<dyn NativeLibrary>, ModuleError> {
        // Safety: module code is trusted; its initialisers run here.
        let library = unsafe { Library::new(path) }.map_err(|e| ModuleError::LibraryLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        debug!("Opened native library: {:?}", path);
        Ok(Box::new(Dylib { library }))
    }
}

/// A library opened by [`DylibLoader`]
struct Dylib {
    library: Library,
}

impl Dylib {
    /// Copy a raw function pointer out of the library.
    ///
    /// # Safety
    /// `T` must match the exported symbol's real signature.
    unsafe fn raw<T: Copy>(&self, symbol: &str) -> Option<T> {
        unsafe { self.library.get::<T>(symbol.as_bytes()).ok().map(|sym| *sym) }
    }
}

impl NativeLibrary for Dylib {
    fn init_entry(&self, symbol: &str) -> Option<InitFn> {
        let entry = unsafe { self.raw::<InitEntry>(symbol)? };
        Some(Box::new(move || {
            let status: c_int = unsafe { entry() };
            status
        }))
    }

    fn shutdown_entry(&self, symbol: &str) -> Option<ShutdownFn> {
        let entry = unsafe { self.raw::<ShutdownEntry>(symbol)? };
        Some(Box::new(move || unsafe { entry() }))
    }

    fn metadata_entry(&self, symbol: &str) -> Option<MetadataFn> {
        let entry = unsafe { self.raw::<MetadataEntry>(symbol)? };
        Some(Box::new(move || {
            let ptr = unsafe { entry() };
            if ptr.is_null() {
                return None;
            }
            let value = unsafe { CStr::from_ptr(ptr) };
            Some(value.to_string_lossy().into_owned())
        }))
    }
}

impl Drop for Dylib {
    fn drop(&mut self) {
        debug!("Closing native library");
    }
}
