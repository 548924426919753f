//! Snapshot-diff watch backend
//!
//! The backend remembers the modification time of every module file and
//! diffs a fresh listing against it whenever its trigger fires.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crossbeam_channel::{Receiver, unbounded};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use super::{
    ChangeEvent, ChangeKind, ReadinessCheck, WatchBackend, readiness_check, scan_module_files,
};
use crate::config::WatchBackendKind;
use crate::error::WatchError;

/// Module file name to modification time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySnapshot {
    entries: BTreeMap<String, SystemTime>,
}

impl DirectorySnapshot {
    /// Record the module files currently in `dir`.
    ///
    /// A file that disappears while being listed is skipped.
    pub fn capture(dir: &Path) -> io::Result<Self> {
        let mut entries = BTreeMap::new();

        for name in scan_module_files(dir)? {
            match fs::metadata(dir.join(&name)).and_then(|m| m.modified()) {
                Ok(modified) => {
                    entries.insert(name, modified);
                }
                Err(e) => debug!("Skipping {} in snapshot: {}", name, e),
            }
        }

        Ok(Self { entries })
    }

    /// Changes that turn `self` into `newer`.
    ///
    /// Unloads come first, then loads and reloads in name order.
    pub fn diff(&self, newer: &Self) -> Vec<ChangeEvent> {
        let mut events: Vec<ChangeEvent> = self
            .entries
            .keys()
            .filter(|name| !newer.entries.contains_key(*name))
            .map(ChangeEvent::unload)
            .collect();

        for (name, modified) in &newer.entries {
            match self.entries.get(name) {
                None => events.push(ChangeEvent::load(name)),
                Some(previous) if previous != modified => events.push(ChangeEvent::reload(name)),
                Some(_) => {}
            }
        }

        events
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<SystemTime> {
        self.entries.get(name).copied()
    }

    fn insert(&mut self, name: String, modified: SystemTime) {
        self.entries.insert(name, modified);
    }

    fn remove(&mut self, name: &str) {
        self.entries.remove(name);
    }
}

impl FromIterator<(String, SystemTime)> for DirectorySnapshot {
    fn from_iter<I: IntoIterator<Item = (String, SystemTime)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Decides when a snapshot backend re-lists the directory
pub trait ChangeTrigger {
    /// Check if the directory may have changed since the last call
    fn fired(&mut self) -> bool;

    /// Backend kind reported by a watcher using this trigger
    fn backend_kind(&self) -> WatchBackendKind {
        WatchBackendKind::SnapshotNotify
    }

    /// Release any OS resources
    fn stop(&mut self) {}
}

/// Fires when the OS reported any activity in the directory
pub struct NotifyTrigger {
    watcher: Option<RecommendedWatcher>,
    rx: Receiver<notify::Result<Event>>,
}

impl NotifyTrigger {
    /// Register a change handle on `dir`
    pub fn start(dir: &Path) -> Result<Self, WatchError> {
        let (tx, rx) = unbounded();

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                let _ = tx.send(result);
            },
            Config::default(),
        )?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            watcher: Some(watcher),
            rx,
        })
    }
}

impl ChangeTrigger for NotifyTrigger {
    fn fired(&mut self) -> bool {
        let mut fired = false;
        for result in self.rx.try_iter() {
            match result {
                Ok(_) => fired = true,
                Err(e) => warn!("Watch error: {}", e),
            }
        }
        fired
    }

    fn stop(&mut self) {
        self.watcher = None;
    }
}

/// Fires on every check
#[derive(Debug, Default, Clone, Copy)]
pub struct RescanTrigger;

impl ChangeTrigger for RescanTrigger {
    fn fired(&mut self) -> bool {
        true
    }

    fn backend_kind(&self) -> WatchBackendKind {
        WatchBackendKind::SnapshotRescan
    }
}

/// Watch backend that diffs directory snapshots
pub struct SnapshotWatcher<T> {
    dir: PathBuf,
    trigger: T,
    snapshot: Option<DirectorySnapshot>,
    retry: bool,
    ready: Option<ReadinessCheck>,
}

impl<T: ChangeTrigger> SnapshotWatcher<T> {
    /// Take the initial snapshot of `dir`
    pub fn start(dir: &Path, trigger: T, verify_readable: bool) -> Result<Self, WatchError> {
        let snapshot = DirectorySnapshot::capture(dir)?;
        debug!("Initial snapshot of {:?}: {} files", dir, snapshot.len());

        Ok(Self {
            dir: dir.to_path_buf(),
            trigger,
            snapshot: Some(snapshot),
            retry: false,
            ready: readiness_check(verify_readable),
        })
    }

    /// Replace the check that decides whether a file can be loaded yet.
    ///
    /// Enables the readiness check if it was off.
    pub fn with_readiness_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&Path) -> io::Result<()> + Send + 'static,
    {
        self.ready = Some(Box::new(check));
        self
    }

    /// Current snapshot, `None` once stopped
    pub fn snapshot(&self) -> Option<&DirectorySnapshot> {
        self.snapshot.as_ref()
    }

    /// Check if the next check re-lists regardless of the trigger
    pub fn retry_pending(&self) -> bool {
        self.retry
    }

    /// Drop events for files that cannot be opened yet, rolling their
    /// snapshot entry back so the next listing reports them again.
    ///
    /// Returns the kept events and whether anything was held back.
    fn hold_unreadable(
        &self,
        events: Vec<ChangeEvent>,
        previous: &DirectorySnapshot,
        next: &mut DirectorySnapshot,
    ) -> (Vec<ChangeEvent>, bool) {
        let Some(ready) = &self.ready else {
            return (events, false);
        };

        let mut kept = Vec::with_capacity(events.len());
        let mut held = false;

        for event in events {
            if event.kind == ChangeKind::Unload {
                kept.push(event);
                continue;
            }
            if let Err(e) = ready(&self.dir.join(&event.file_name)) {
                debug!("Deferring {}: {}", event.file_name, e);
                match previous.get(&event.file_name) {
                    Some(modified) if event.kind == ChangeKind::Reload => {
                        next.insert(event.file_name.clone(), modified)
                    }
                    _ => next.remove(&event.file_name),
                }
                held = true;
                continue;
            }
            kept.push(event);
        }

        (kept, held)
    }
}

impl<T: ChangeTrigger> WatchBackend for SnapshotWatcher<T> {
    fn check(&mut self, _loaded: &[&str]) -> Vec<ChangeEvent> {
        let Some(previous) = self.snapshot.take() else {
            return Vec::new();
        };

        let fired = self.trigger.fired();
        if !fired && !self.retry {
            self.snapshot = Some(previous);
            return Vec::new();
        }
        self.retry = false;

        let mut next = match DirectorySnapshot::capture(&self.dir) {
            Ok(next) => next,
            Err(e) => {
                warn!("Failed to list {:?}, retrying next check: {}", self.dir, e);
                self.retry = true;
                self.snapshot = Some(previous);
                return Vec::new();
            }
        };

        let events = previous.diff(&next);
        if events.is_empty() {
            self.snapshot = Some(previous);
            return Vec::new();
        }

        let (events, held) = self.hold_unreadable(events, &previous, &mut next);
        self.retry = held;

        self.snapshot = Some(next);
        events
    }

    fn kind(&self) -> WatchBackendKind {
        self.trigger.backend_kind()
    }

    fn stop(&mut self) {
        self.trigger.stop();
        if self.snapshot.take().is_some() {
            debug!("Stopped snapshot watch on {:?}", self.dir);
        }
    }
}

impl<T> std::fmt::Debug for SnapshotWatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotWatcher")
            .field("dir", &self.dir)
            .field("snapshot", &self.snapshot)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
