//! Hotswap module SDK
//!
//! Everything a hot-reloadable module needs to be picked up by the hotswap
//! runtime:
//! - The default names of the exported entry points
//! - The status codes `module_init` reports
//! - [`declare_module!`], which generates the C ABI exports from plain Rust
//!   functions
//!
//! A module is a `cdylib` exporting at least:
//!
//! ```c
//! int  module_init(void);      /* 0 on success */
//! void module_shutdown(void);
//! ```
//!
//! and optionally `module_name`, `module_version` and `module_description`,
//! each returning a NUL-terminated string (or null).

use std::ffi::{c_char, c_int};

/// Default name of the mandatory init entry point.
pub const DEFAULT_INIT_SYMBOL: &str = "module_init";
/// Default name of the mandatory shutdown entry point.
pub const DEFAULT_SHUTDOWN_SYMBOL: &str = "module_shutdown";
/// Default name of the optional display-name accessor.
pub const DEFAULT_NAME_SYMBOL: &str = "module_name";
/// Default name of the optional version accessor.
pub const DEFAULT_VERSION_SYMBOL: &str = "module_version";
/// Default name of the optional description accessor.
pub const DEFAULT_DESCRIPTION_SYMBOL: &str = "module_description";

/// Status returned by a successful `module_init`.
pub const INIT_SUCCESS: c_int = 0;
/// Generic failure status, used when init panics or reports no code.
pub const INIT_FAILURE: c_int = 1;

/// Signature of the init entry point.
pub type InitEntry = unsafe extern "C" fn() -> c_int;
/// Signature of the shutdown entry point.
pub type ShutdownEntry = unsafe extern "C" fn();
/// Signature of the metadata accessors.
pub type MetadataEntry = unsafe extern "C" fn() -> *const c_char;

/// Map the result of a module's init function to the status it exports.
///
/// A zero error code would read as success on the host side, so it is
/// reported as [`INIT_FAILURE`].
pub fn init_status(result: Result<(), c_int>) -> c_int {
    match result {
        Ok(()) => INIT_SUCCESS,
        Err(INIT_SUCCESS) => INIT_FAILURE,
        Err(code) => code,
    }
}

/// Macro to export a hot-reloadable module
///
/// `init` must be a `fn() -> Result<(), c_int>` and `shutdown` a `fn()`.
/// Panics are caught at the boundary; a panicking init reports failure.
///
/// ```rust,ignore
/// fn start() -> Result<(), std::ffi::c_int> { Ok(()) }
/// fn stop() {}
///
/// hotswap_sdk::declare_module! {
///     init: start,
///     shutdown: stop,
///     name: "Counter",
///     version: "0.1.0",
/// }
/// ```
#[macro_export]
macro_rules! declare_module {
    (
        init: $init:path,
        shutdown: $shutdown:path
        $(, name: $name:literal)?
        $(, version: $version:literal)?
        $(, description: $description:literal)?
        $(,)?
    ) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn module_init() -> ::std::ffi::c_int {
            match ::std::panic::catch_unwind($init) {
                Ok(result) => $crate::init_status(result),
                Err(_) => $crate::INIT_FAILURE,
            }
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn module_shutdown() {
            let _ = ::std::panic::catch_unwind($shutdown);
        }

        $(
            #[unsafe(no_mangle)]
            pub extern "C" fn module_name() -> *const ::std::ffi::c_char {
                concat!($name, "\0").as_ptr().cast()
            }
        )?

        $(
            #[unsafe(no_mangle)]
            pub extern "C" fn module_version() -> *const ::std::ffi::c_char {
                concat!($version, "\0").as_ptr().cast()
            }
        )?

        $(
            #[unsafe(no_mangle)]
            pub extern "C" fn module_description() -> *const ::std::ffi::c_char {
                concat!($description, "\0").as_ptr().cast()
            }
        )?
    };
}
