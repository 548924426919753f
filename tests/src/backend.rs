use std::collections::VecDeque;
use std::sync::Arc;

use hotswap_runtime::{ChangeEvent, WatchBackend, WatchBackendKind};
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Script {
    batches: VecDeque<Vec<ChangeEvent>>,
    observed: Vec<Vec<String>>,
    stopped: bool,
}

/// A watch backend that replays queued batches.
///
/// Each check pops one batch. The identities passed to every check are
/// recorded so tests can see what the engine reported as loaded.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
}

/// Test-side handle on a [`ScriptedBackend`]
#[derive(Debug, Clone, Default)]
pub struct ScriptHandle {
    script: Arc<Mutex<Script>>,
}

impl ScriptedBackend {
    pub fn new() -> (Box<dyn WatchBackend>, ScriptHandle) {
        let backend = Self::default();
        let handle = ScriptHandle {
            script: backend.script.clone(),
        };
        (Box::new(backend), handle)
    }
}

impl ScriptHandle {
    /// Queue one batch for a later check
    pub fn push(&self, batch: Vec<ChangeEvent>) {
        self.script.lock().batches.push_back(batch);
    }

    /// Identities the engine passed to each check so far
    pub fn observed(&self) -> Vec<Vec<String>> {
        self.script.lock().observed.clone()
    }

    /// Batches queued but not yet checked
    pub fn pending(&self) -> usize {
        self.script.lock().batches.len()
    }

    /// Whether the runtime stopped the backend
    pub fn stopped(&self) -> bool {
        self.script.lock().stopped
    }
}

impl WatchBackend for ScriptedBackend {
    fn check(&mut self, loaded: &[&str]) -> Vec<ChangeEvent> {
        let mut script = self.script.lock();
        if script.stopped {
            return Vec::new();
        }
        script
            .observed
            .push(loaded.iter().map(|s| s.to_string()).collect());
        script.batches.pop_front().unwrap_or_default()
    }

    fn kind(&self) -> WatchBackendKind {
        WatchBackendKind::SnapshotRescan
    }

    fn stop(&mut self) {
        self.script.lock().stopped = true;
    }
}
