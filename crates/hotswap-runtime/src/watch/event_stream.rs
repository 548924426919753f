//! Event-stream watch backend
//!
//! Raw notifications are forwarded by the `notify` callback into a channel
//! and drained on every check. The drained batch is reduced per file name to
//! at most one [`ChangeEvent`].

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use crossbeam_channel::{Receiver, TryRecvError, unbounded};
use notify::{
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
    event::{AccessKind, AccessMode, ModifyKind, RenameMode},
};
use tracing::{debug, warn};

use super::{ChangeEvent, ChangeKind, ReadinessCheck, WatchBackend, readiness_check};
use crate::config::WatchBackendKind;
use crate::error::WatchError;
use crate::identity::{derive_identity, is_module_file};

/// Normalised raw notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RawChange {
    Created,
    Written,
    Removed,
}

/// Map one `notify` event onto per-file raw changes.
pub(crate) fn map_event(event: &Event) -> Vec<(PathBuf, RawChange)> {
    let each = |change: RawChange| {
        event
            .paths
            .iter()
            .map(|path| (path.clone(), change))
            .collect::<Vec<_>>()
    };

    match event.kind {
        EventKind::Create(_) => each(RawChange::Created),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => each(RawChange::Written),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => each(RawChange::Written),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => each(RawChange::Removed),
        EventKind::Remove(_) => each(RawChange::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut changes = Vec::with_capacity(2);
            if let Some(from) = event.paths.first() {
                changes.push((from.clone(), RawChange::Removed));
            }
            if let Some(to) = event.paths.get(1) {
                changes.push((to.clone(), RawChange::Written));
            }
            changes
        }
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|path| {
                let change = if path.exists() {
                    RawChange::Written
                } else {
                    RawChange::Removed
                };
                (path.clone(), change)
            })
            .collect(),
        // no close-after-write notification on these platforms
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => each(RawChange::Written),
        _ => Vec::new(),
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Pending {
    removed: bool,
    written: bool,
}

/// Reduce a batch of raw changes to change events.
///
/// Names keep their first-seen order.
pub(crate) fn classify<I>(raw: I, loaded: &[&str]) -> Vec<ChangeEvent>
where
    I: IntoIterator<Item = (String, RawChange)>,
{
    let mut pending: Vec<(String, Pending)> = Vec::new();

    for (name, change) in raw {
        let index = match pending.iter().position(|(n, _)| *n == name) {
            Some(index) => index,
            None => {
                pending.push((name, Pending::default()));
                pending.len() - 1
            }
        };
        let state = &mut pending[index].1;
        match change {
            RawChange::Removed => {
                state.removed = true;
                state.written = false;
            }
            RawChange::Created => state.removed = false,
            RawChange::Written => {
                state.removed = false;
                state.written = true;
            }
        }
    }

    pending
        .into_iter()
        .filter_map(|(name, state)| {
            if state.written {
                let identity = derive_identity(&name);
                let kind = if loaded.contains(&identity.as_str()) {
                    ChangeKind::Reload
                } else {
                    ChangeKind::Load
                };
                Some(ChangeEvent::new(name, kind))
            } else if state.removed {
                Some(ChangeEvent::unload(name))
            } else {
                None
            }
        })
        .collect()
}

/// Hold back events for files that cannot be opened yet.
///
/// Held names go into `deferred`; a name whose file is gone is forgotten.
fn hold_unreadable(
    dir: &Path,
    events: Vec<ChangeEvent>,
    deferred: &mut BTreeSet<String>,
    ready: &dyn Fn(&Path) -> io::Result<()>,
) -> Vec<ChangeEvent> {
    events
        .into_iter()
        .filter(|event| {
            if event.kind == ChangeKind::Unload {
                return true;
            }
            match ready(&dir.join(&event.file_name)) {
                Ok(()) => true,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("{} vanished before it could be read", event.file_name);
                    false
                }
                Err(e) => {
                    debug!("Deferring {}: {}", event.file_name, e);
                    deferred.insert(event.file_name.clone());
                    false
                }
            }
        })
        .collect()
}

/// Watch backend driven by per-file notifications
pub struct EventStreamWatcher {
    dir: PathBuf,
    watcher: Option<RecommendedWatcher>,
    rx: Receiver<notify::Result<Event>>,
    deferred: BTreeSet<String>,
    ready: Option<ReadinessCheck>,
}

impl EventStreamWatcher {
    /// Start watching `dir`, non-recursively
    pub fn start(dir: &Path, verify_readable: bool) -> Result<Self, WatchError> {
        let (tx, rx) = unbounded();

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| {
                let _ = tx.send(result);
            },
            Config::default(),
        )?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            dir: dir.to_path_buf(),
            watcher: Some(watcher),
            rx,
            deferred: BTreeSet::new(),
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

    fn drain(&self) -> Vec<(String, RawChange)> {
        let mut raw = Vec::new();

        loop {
            match self.rx.try_recv() {
                Ok(Ok(event)) => {
                    for (path, change) in map_event(&event) {
                        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                            continue;
                        };
                        if is_module_file(name) {
                            raw.push((name.to_string(), change));
                        }
                    }
                }
                Ok(Err(e)) => warn!("Watch error on {:?}: {}", self.dir, e),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    debug!("Watch channel for {:?} closed", self.dir);
                    break;
                }
            }
        }

        raw
    }
}

impl WatchBackend for EventStreamWatcher {
    fn check(&mut self, loaded: &[&str]) -> Vec<ChangeEvent> {
        if self.watcher.is_none() {
            return Vec::new();
        }

        // deferred names are retried as if rewritten
        let retried = std::mem::take(&mut self.deferred)
            .into_iter()
            .map(|name| (name, RawChange::Written));
        let raw: Vec<_> = retried.chain(self.drain()).collect();
        if raw.is_empty() {
            return Vec::new();
        }

        let events = classify(raw, loaded);
        match &self.ready {
            Some(ready) => hold_unreadable(&self.dir, events, &mut self.deferred, ready),
            None => events,
        }
    }

    fn kind(&self) -> WatchBackendKind {
        WatchBackendKind::EventStream
    }

    fn stop(&mut self) {
        if self.watcher.take().is_some() {
            debug!("Stopped event-stream watch on {:?}", self.dir);
        }
        self.deferred.clear();
    }
}

impl std::fmt::Debug for EventStreamWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStreamWatcher")
            .field("dir", &self.dir)
            .field("running", &self.watcher.is_some())
            .field("deferred", &self.deferred)
            .finish_non_exhaustive()
    }
}
