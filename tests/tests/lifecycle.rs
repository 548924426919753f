//! Runtime lifecycle against a real directory, using the rescan backend

use std::fs;

use hotswap_runtime::{Runtime, RuntimeConfig, RuntimeError, WatchBackendKind};
use hotswap_testing::{FakeLoader, FakeModule, JournalEntry, ModuleDir, assert_live};

fn init(dir: &ModuleDir, loader: FakeLoader) -> Runtime<FakeLoader> {
    Runtime::init_with_loader(dir.config(WatchBackendKind::SnapshotRescan), loader).unwrap()
}

#[test]
fn test_end_to_end_add_overwrite_delete() {
    let dir = ModuleDir::new().unwrap();
    let loader = FakeLoader::new();
    let journal = loader.journal();
    let mut runtime = init(&dir, loader);

    assert_eq!(runtime.module_count(), 0);
    assert_eq!(runtime.poll().unwrap(), 0);

    dir.install("counter", &FakeModule::new().tag("v1")).unwrap();
    assert_eq!(runtime.poll().unwrap(), 1);
    assert_eq!(runtime.module_count(), 1);

    journal.take();
    dir.overwrite("counter", &FakeModule::new().tag("v2")).unwrap();
    assert_eq!(runtime.poll().unwrap(), 1);
    assert_eq!(runtime.module_count(), 1);
    let entries = journal.take();
    let shutdown = entries
        .iter()
        .position(|e| *e == JournalEntry::Shutdown("counter".into()))
        .expect("old instance shut down");
    let init = entries
        .iter()
        .position(|e| *e == JournalEntry::init("counter", Some("v2")))
        .expect("new instance initialised");
    assert!(shutdown < init);

    dir.remove("counter").unwrap();
    assert_eq!(runtime.poll().unwrap(), 1);
    assert_eq!(runtime.module_count(), 0);
    assert_eq!(journal.open_handles(), 0);

    runtime.shutdown();
}

#[test]
fn test_init_loads_existing_files_and_skips_broken_ones() {
    let dir = ModuleDir::new().unwrap();
    dir.install("alpha", &FakeModule::new()).unwrap();
    dir.install("beta", &FakeModule::new().corrupt()).unwrap();
    dir.install("gamma", &FakeModule::new().missing("module_shutdown"))
        .unwrap();
    dir.install("delta", &FakeModule::new()).unwrap();
    fs::write(dir.path().join("README.txt"), "not a module").unwrap();

    let loader = FakeLoader::new();
    let journal = loader.journal();
    let runtime = init(&dir, loader);

    assert_live!(runtime.registry(), ["alpha", "delta"]);
    assert_eq!(runtime.registry().capacity(), 2);
    assert_eq!(journal.open_handles(), 2);

    // one generation directory per live module
    let staged = fs::read_dir(runtime.config().scratch_dir()).unwrap().count();
    assert_eq!(staged, 2);
}

#[test]
fn test_non_ascii_names_are_ignored_or_loaded() {
    let dir = ModuleDir::new().unwrap();
    fs::write(dir.path().join("привет"), "readme").unwrap();
    fs::write(dir.path().join("αβγ"), "notes").unwrap();
    dir.install("модуль", &FakeModule::new()).unwrap();

    let mut runtime = init(&dir, FakeLoader::new());
    assert_live!(runtime.registry(), ["модуль"]);

    fs::write(dir.path().join("ещё"), "more").unwrap();
    assert_eq!(runtime.poll().unwrap(), 0);
    assert_eq!(runtime.module_count(), 1);
}

#[test]
fn test_staged_copy_is_independent_of_source() {
    let dir = ModuleDir::new().unwrap();
    dir.install("alpha", &FakeModule::new().tag("v1")).unwrap();
    let runtime = init(&dir, FakeLoader::new());

    let info = runtime.module("alpha").unwrap();
    assert!(info.staged_path.starts_with(runtime.config().scratch_dir()));
    assert_eq!(
        info.staged_path.file_name(),
        dir.file("alpha").file_name()
    );
    assert!(info.digest.is_some());

    dir.install("alpha", &FakeModule::new().tag("v2")).unwrap();
    let staged = FakeModule::parse(&fs::read_to_string(&info.staged_path).unwrap());
    assert_eq!(staged, FakeModule::new().tag("v1"));
}

#[test]
fn test_shutdown_removes_scratch_and_keeps_sources() {
    let dir = ModuleDir::new().unwrap();
    dir.install("alpha", &FakeModule::new()).unwrap();
    dir.install("beta", &FakeModule::new()).unwrap();
    let loader = FakeLoader::new();
    let journal = loader.journal();
    let runtime = init(&dir, loader);
    let scratch = runtime.config().scratch_dir();
    assert!(scratch.is_dir());

    runtime.shutdown();

    assert!(!scratch.exists());
    assert!(dir.file("alpha").exists());
    assert!(dir.file("beta").exists());
    assert_eq!(journal.open_handles(), 0);

    let shutdowns: Vec<_> = journal
        .entries()
        .into_iter()
        .filter(|e| matches!(e, JournalEntry::Shutdown(_)))
        .collect();
    assert_eq!(
        shutdowns,
        vec![
            JournalEntry::Shutdown("beta".into()),
            JournalEntry::Shutdown("alpha".into())
        ]
    );
}

#[test]
fn test_foreign_scratch_directory_is_left_alone() {
    let dir = ModuleDir::new().unwrap();
    let foreign = dir.path().join("src");
    fs::create_dir_all(&foreign).unwrap();
    fs::write(foreign.join("lib.rs"), "// keep").unwrap();

    let config = dir
        .config(WatchBackendKind::SnapshotRescan)
        .with_scratch_dir_name("src");
    let report = Runtime::init_with_loader(config, FakeLoader::new()).unwrap_err();

    assert!(matches!(report.current_context(), RuntimeError::Filesystem(_)));
    assert!(foreign.join("lib.rs").exists());
}

#[test]
fn test_stale_scratch_directory_is_cleared() {
    let dir = ModuleDir::new().unwrap();
    let stale = dir.path().join(".tmp").join("g41");
    fs::create_dir_all(&stale).unwrap();
    fs::write(stale.join("leftover.so"), "old").unwrap();

    let runtime = init(&dir, FakeLoader::new());
    assert!(!stale.exists());
    runtime.shutdown();
}

#[test]
fn test_unusable_module_dir_fails_init() {
    let dir = ModuleDir::new().unwrap();
    let blocker = dir.root().join("not-a-dir");
    fs::write(&blocker, "file").unwrap();

    let config = RuntimeConfig::default()
        .with_module_dir(&blocker)
        .with_backend(WatchBackendKind::SnapshotRescan);
    let report = Runtime::init_with_loader(config, FakeLoader::new()).unwrap_err();

    assert!(matches!(
        report.current_context(),
        RuntimeError::Filesystem(_)
    ));
    assert!(format!("{report:?}").contains("scratch directory"));
}

#[test]
fn test_config_file_drives_init() {
    let dir = ModuleDir::new().unwrap();
    dir.install("alpha", &FakeModule::new()).unwrap();
    let file = dir.root().join("hotswap.json");
    let body = serde_json::json!({
        "module_dir": dir.path(),
        "scratch_dir_name": ".stage",
        "backend": "snapshot_rescan",
        "max_modules": 8
    });
    fs::write(&file, body.to_string()).unwrap();

    let config = RuntimeConfig::from_file(&file).unwrap();
    let runtime = Runtime::init_with_loader(config, FakeLoader::new()).unwrap();

    assert_eq!(runtime.module_count(), 1);
    assert!(dir.path().join(".stage").is_dir());
    assert_eq!(runtime.backend_kind(), Some(WatchBackendKind::SnapshotRescan));
}

#[test]
fn test_drop_without_shutdown_releases_modules() {
    let dir = ModuleDir::new().unwrap();
    dir.install("alpha", &FakeModule::new()).unwrap();
    let loader = FakeLoader::new();
    let journal = loader.journal();

    let scratch = {
        let runtime = init(&dir, loader);
        runtime.config().scratch_dir()
    };

    assert!(!scratch.exists());
    assert_eq!(journal.open_handles(), 0);
    assert!(journal.entries().contains(&JournalEntry::Shutdown("alpha".into())));
}

#[test]
fn test_module_list_serialises() {
    let dir = ModuleDir::new().unwrap();
    dir.install("alpha", &FakeModule::new().name("Alpha").version("1.0.0"))
        .unwrap();
    let runtime = init(&dir, FakeLoader::new());

    let json = serde_json::to_value(runtime.modules()).unwrap();
    assert_eq!(json[0]["identity"], "alpha");
    assert_eq!(json[0]["name"], "Alpha");
    assert_eq!(json[0]["slot"], 0);
}
