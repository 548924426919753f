//! Example module for the hotswap runtime
//!
//! Build it, copy the library into the watched directory and edit
//! `GREETING` while `hotswap run` is active to see it reloaded:
//!
//! ```bash
//! cargo build -p counter-module
//! cp target/debug/libcounter_module.so mods/
//! hotswap -d mods run
//! ```

use std::ffi::c_int;
use std::sync::atomic::{AtomicU64, Ordering};

const GREETING: &str = "counter module says hello";

/// Inits seen by this copy of the library
static INITS: AtomicU64 = AtomicU64::new(0);

fn start() -> Result<(), c_int> {
    let count = INITS.fetch_add(1, Ordering::SeqCst) + 1;
    eprintln!("[counter] {GREETING} (init #{count})");
    Ok(())
}

fn stop() {
    eprintln!(
        "[counter] shutting down after {} inits",
        INITS.load(Ordering::SeqCst)
    );
}

hotswap_sdk::declare_module! {
    init: start,
    shutdown: stop,
    name: "Counter",
    version: "0.1.0",
    description: "Counts how often it has been initialised",
}
