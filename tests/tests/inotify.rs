//! End-to-end run of the event-stream backend

#![cfg(target_os = "linux")]

use std::time::{Duration, Instant};

use hotswap_runtime::{Runtime, WatchBackendKind};
use hotswap_testing::{FakeLoader, FakeModule, JournalEntry, ModuleDir};

/// Poll until `done` holds or a few seconds pass
fn poll_until<F>(runtime: &mut Runtime<FakeLoader>, mut done: F) -> bool
where
    F: FnMut(&Runtime<FakeLoader>) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        runtime.poll().unwrap();
        if done(runtime) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    false
}

#[test]
fn test_event_stream_follows_directory() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("hotswap_runtime=debug")
        .with_test_writer()
        .try_init();

    let dir = ModuleDir::new().unwrap();
    let loader = FakeLoader::new();
    let journal = loader.journal();
    let mut runtime =
        Runtime::init_with_loader(dir.config(WatchBackendKind::EventStream), loader).unwrap();
    assert_eq!(runtime.backend_kind(), Some(WatchBackendKind::EventStream));
    assert_eq!(runtime.poll().unwrap(), 0);

    dir.install("counter", &FakeModule::new().tag("v1")).unwrap();
    assert!(poll_until(&mut runtime, |rt| rt.module_count() == 1));

    dir.install("counter", &FakeModule::new().tag("v2")).unwrap();
    let reloaded = JournalEntry::init("counter", Some("v2"));
    assert!(poll_until(&mut runtime, |_| journal.entries().contains(&reloaded)));
    assert_eq!(runtime.module_count(), 1);

    dir.remove("counter").unwrap();
    assert!(poll_until(&mut runtime, |rt| rt.module_count() == 0));
    assert_eq!(journal.open_handles(), 0);

    runtime.shutdown();
}

#[test]
fn test_replace_by_rename_reloads() {
    let dir = ModuleDir::new().unwrap();
    dir.install("swap", &FakeModule::new().tag("v1")).unwrap();
    let loader = FakeLoader::new();
    let journal = loader.journal();
    let mut runtime =
        Runtime::init_with_loader(dir.config(WatchBackendKind::EventStream), loader).unwrap();
    assert_eq!(runtime.module_count(), 1);

    // build the new revision outside the directory, then move it in
    let incoming = dir.root().join("swap.incoming");
    std::fs::write(&incoming, FakeModule::new().tag("v2").render()).unwrap();
    std::fs::rename(&incoming, dir.file("swap")).unwrap();

    let reloaded = JournalEntry::init("swap", Some("v2"));
    assert!(poll_until(&mut runtime, |_| journal.entries().contains(&reloaded)));
    assert_eq!(runtime.module_count(), 1);
}
