//! Reconciliation of change events against the registry
//!
//! A batch of [`ChangeEvent`]s is first turned into a [`ReconcilePlan`]
//! keyed by identity, then applied in a fixed order: capacity growth, all
//! unloads, all reloads, loads into freed slots, loads appended past the
//! previous live count. Holes left by failures are compacted away before
//! returning, so live slots always form a dense prefix between polls.

use std::collections::HashSet;
use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::error::RegistryError;
use crate::identity::derive_identity;
use crate::loader::LibraryLoader;
use crate::registry::ModuleRegistry;
use crate::staging::StagingArea;
use crate::watch::{ChangeEvent, ChangeKind};

/// Registry mutations derived from one batch of events
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Slots to empty
    pub unloads: Vec<usize>,
    /// Slots to reload, with the file to reload from
    pub reloads: Vec<(usize, String)>,
    /// Files to load into new slots
    pub loads: Vec<String>,
}

impl ReconcilePlan {
    /// Build a plan from `events`.
    ///
    /// `slot_of` maps a live identity to its slot. At most one action is
    /// planned per identity; later events for the same identity are dropped.
    pub fn build<F>(events: &[ChangeEvent], slot_of: F) -> Self
    where
        F: Fn(&str) -> Option<usize>,
    {
        let mut plan = Self::default();
        let mut planned = HashSet::new();

        for event in events {
            let identity = derive_identity(&event.file_name);
            if !planned.insert(identity.clone()) {
                warn!(
                    "Ignoring {:?} for {}: already planned in this batch",
                    event.kind, identity
                );
                continue;
            }

            match (event.kind, slot_of(&identity)) {
                (ChangeKind::Unload, Some(slot)) => plan.unloads.push(slot),
                (ChangeKind::Unload, None) => {
                    debug!("Ignoring unload of {}: not loaded", identity);
                }
                (ChangeKind::Reload | ChangeKind::Load, Some(slot)) => {
                    plan.reloads.push((slot, event.file_name.clone()));
                }
                (ChangeKind::Reload | ChangeKind::Load, None) => {
                    plan.loads.push(event.file_name.clone());
                }
            }
        }

        plan
    }

    /// Check if the plan changes nothing
    pub fn is_empty(&self) -> bool {
        self.unloads.is_empty() && self.reloads.is_empty() && self.loads.is_empty()
    }

    /// Capacity needed to apply the plan on top of `live` modules, if it
    /// adds more modules than it removes.
    pub fn required_capacity(&self, live: usize) -> Option<usize> {
        (self.loads.len() > self.unloads.len())
            .then(|| live + (self.loads.len() - self.unloads.len()))
    }
}

/// What applying a plan did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub loaded: usize,
    pub unloaded: usize,
    pub reloaded: usize,
    pub failed: usize,
}

/// Apply `plan` to `registry`.
///
/// Only growing the registry can fail, and it is attempted before anything
/// else is touched. Per-module failures are logged and counted.
pub fn apply<L: LibraryLoader>(
    plan: &ReconcilePlan,
    registry: &mut ModuleRegistry<L>,
    staging: &mut StagingArea,
    module_dir: &Path,
) -> Result<ReconcileSummary, RegistryError> {
    let live_before = registry.live_count();
    if let Some(required) = plan.required_capacity(live_before) {
        if required > registry.capacity() {
            registry.resize(required)?;
        }
    }

    let mut summary = ReconcileSummary::default();

    for &slot in &plan.unloads {
        if let Some(staged) = registry.unload(slot) {
            staging.discard(&staged);
            summary.unloaded += 1;
        }
    }

    for (slot, file_name) in &plan.reloads {
        let staged = match staging.stage(&module_dir.join(file_name)) {
            Ok(staged) => staged,
            Err(e) => {
                error!("Failed to stage {} for reload, keeping old instance: {}", file_name, e);
                summary.failed += 1;
                continue;
            }
        };
        if let Some(old) = registry.unload(*slot) {
            staging.discard(&old);
        }
        match registry.load(&staged, *slot) {
            Ok(_) => summary.reloaded += 1,
            Err(e) => {
                error!("Failed to reload {}: {}", file_name, e);
                staging.discard(&staged);
                summary.failed += 1;
            }
        }
    }

    let mut freed: Vec<usize> = plan.unloads.clone();
    freed.sort_unstable();
    let fill = plan.loads.len().min(freed.len());

    for (file_name, &slot) in plan.loads[..fill].iter().zip(&freed) {
        if load_into(registry, staging, module_dir, file_name, slot) {
            summary.loaded += 1;
        } else {
            summary.failed += 1;
        }
    }

    let mut next = live_before;
    for file_name in &plan.loads[fill..] {
        if load_into(registry, staging, module_dir, file_name, next) {
            summary.loaded += 1;
            next += 1;
        } else {
            summary.failed += 1;
        }
    }

    if registry.has_holes() {
        debug!("Compacting registry");
        registry.compact();
    }
    if plan.unloads.len() > plan.loads.len() || summary.failed > 0 {
        registry.resize(registry.live_count())?;
    }

    Ok(summary)
}

fn load_into<L: LibraryLoader>(
    registry: &mut ModuleRegistry<L>,
    staging: &mut StagingArea,
    module_dir: &Path,
    file_name: &str,
    slot: usize,
) -> bool {
    let staged = match staging.stage(&module_dir.join(file_name)) {
        Ok(staged) => staged,
        Err(e) => {
            error!("Failed to stage {}: {}", file_name, e);
            return false;
        }
    };

    match registry.load(&staged, slot) {
        Ok(module) => {
            info!("Module {} ready in slot {}", module.identity(), slot);
            true
        }
        Err(e) => {
            error!("Failed to load {}: {}", file_name, e);
            staging.discard(&staged);
            false
        }
    }
}
