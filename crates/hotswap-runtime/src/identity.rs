//! Module identity
//!
//! A module is known by the file name it was loaded from, minus directory and
//! extension. The same derivation names a module at load time and correlates
//! a file name reported by a watch backend with an already-loaded module.

use std::path::Path;

/// Maximum identity length in bytes.
pub const IDENTITY_MAX_LEN: usize = 63;

/// Native loadable-module extension of the current platform, without the dot.
pub const MODULE_EXTENSION: &str = std::env::consts::DLL_EXTENSION;

/// Derive a module identity from a path or bare file name.
///
/// Takes the final path component, drops everything from the last `.`
/// onward and truncates the result to [`IDENTITY_MAX_LEN`] bytes.
pub fn derive_identity<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_else(|| path.to_string_lossy());

    let stem = match file_name.rfind('.') {
        Some(idx) => &file_name[..idx],
        None => &file_name[..],
    };

    truncate_on_char_boundary(stem, IDENTITY_MAX_LEN).to_string()
}

/// Check whether a file name carries the platform's module extension.
///
/// The name must have at least one character before the `.<ext>` suffix.
pub fn is_module_file(file_name: &str) -> bool {
    let Some((head, ext)) = file_name.rsplit_once('.') else {
        return false;
    };
    if head.is_empty() {
        return false;
    }

    if cfg!(windows) {
        ext.eq_ignore_ascii_case(MODULE_EXTENSION)
    } else {
        ext == MODULE_EXTENSION
    }
}

/// File name a module with `identity` would be stored under.
pub fn module_file_name(identity: &str) -> String {
    format!("{}.{}", identity, MODULE_EXTENSION)
}

/// Truncate `s` to at most `max` bytes without splitting a character.
pub fn truncate_on_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }

    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
