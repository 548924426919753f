//! Runtime lifecycle
//!
//! [`Runtime`] ties the pieces together: it owns the registry, the staging
//! area and the watch backend, and exposes the `init` / `poll` / `shutdown`
//! cycle to the host.
//!
//! ```rust,ignore
//! use hotswap_runtime::{Runtime, RuntimeConfig};
//!
//! let mut runtime = Runtime::init(RuntimeConfig::default().with_module_dir("mods"))?;
//! loop {
//!     runtime.poll()?;
//!     std::thread::sleep(std::time::Duration::from_secs(1));
//! }
//! ```

use error_stack::ResultExt;
use tracing::{debug, info, warn};

use crate::config::{RuntimeConfig, WatchBackendKind};
use crate::error::{IntoRuntimeReport, RuntimeResult};
use crate::loader::{DylibLoader, LibraryLoader};
use crate::reconcile::{self, ReconcilePlan};
use crate::registry::{ModuleInfo, ModuleRegistry};
use crate::staging::StagingArea;
use crate::watch::{self, WatchBackend};

/// A running module host
///
/// Dropping the runtime performs the same teardown as [`Runtime::shutdown`].
pub struct Runtime<L = DylibLoader> {
    config: RuntimeConfig,
    registry: ModuleRegistry<L>,
    staging: Option<StagingArea>,
    backend: Option<Box<dyn WatchBackend>>,
}

impl Runtime<DylibLoader> {
    /// Start a runtime that opens modules with the platform loader.
    pub fn init(config: RuntimeConfig) -> RuntimeResult<Self> {
        Self::init_with_loader(config, DylibLoader::new())
    }
}

impl<L: LibraryLoader> Runtime<L> {
    /// Start a runtime with a custom library loader.
    ///
    /// The watch backend is chosen by [`RuntimeConfig::backend`].
    pub fn init_with_loader(config: RuntimeConfig, loader: L) -> RuntimeResult<Self> {
        config.validate().into_report()?;
        let staging = Self::prepare_staging(&config)?;

        let started =
            watch::start_backend(config.backend, &config.module_dir, config.verify_readable)
                .into_report()
                .attach(format!("watching {}", config.module_dir.display()));
        let backend = match started {
            Ok(backend) => backend,
            Err(report) => {
                discard_staging(staging);
                return Err(report);
            }
        };

        Self::bootstrap(config, loader, staging, backend)
    }

    /// Start a runtime with a custom loader and an already running backend.
    pub fn init_with_backend(
        config: RuntimeConfig,
        loader: L,
        backend: Box<dyn WatchBackend>,
    ) -> RuntimeResult<Self> {
        config.validate().into_report()?;
        let staging = Self::prepare_staging(&config)?;
        Self::bootstrap(config, loader, staging, backend)
    }

    fn prepare_staging(config: &RuntimeConfig) -> RuntimeResult<StagingArea> {
        let scratch = config.scratch_dir();
        StagingArea::prepare(&scratch)
            .into_report()
            .attach(format!("preparing scratch directory {}", scratch.display()))
    }

    /// Scan the module directory and load everything in it.
    ///
    /// The runtime is assembled before the scan, so an early return drops it
    /// and releases whatever was acquired.
    fn bootstrap(
        config: RuntimeConfig,
        loader: L,
        staging: StagingArea,
        backend: Box<dyn WatchBackend>,
    ) -> RuntimeResult<Self> {
        let registry = ModuleRegistry::new(loader, config.symbols.clone())
            .with_capacity_limit(config.max_modules);

        let mut runtime = Self {
            config,
            registry,
            staging: Some(staging),
            backend: Some(backend),
        };

        let files = watch::scan_module_files(&runtime.config.module_dir)
            .into_report()
            .attach(format!("scanning {}", runtime.config.module_dir.display()))?;

        runtime
            .registry
            .initialize(files.len())
            .into_report()
            .attach(format!("allocating {} slots", files.len()))?;

        let mut next = 0;
        for file_name in &files {
            if runtime.load_initial(file_name, next) {
                next += 1;
            }
        }
        runtime.registry.resize(next).into_report()?;

        info!(
            "Runtime started: {} of {} modules loaded from {:?} ({} watch)",
            next,
            files.len(),
            runtime.config.module_dir,
            runtime.backend_kind().unwrap_or(runtime.config.backend)
        );

        Ok(runtime)
    }

    fn load_initial(&mut self, file_name: &str, slot: usize) -> bool {
        let Some(staging) = self.staging.as_mut() else {
            return false;
        };

        let source = self.config.module_dir.join(file_name);
        let staged = match staging.stage(&source) {
            Ok(staged) => staged,
            Err(e) => {
                warn!("Skipping {}: failed to stage: {}", file_name, e);
                return false;
            }
        };

        match self.registry.load(&staged, slot) {
            Ok(_) => true,
            Err(e) => {
                warn!("Skipping {}: {}", file_name, e);
                staging.discard(&staged);
                false
            }
        }
    }

    /// Apply pending changes in the module directory.
    ///
    /// Returns the number of raw change events seen. Only a failure to grow
    /// the registry is an error, and it leaves every module as it was.
    pub fn poll(&mut self) -> RuntimeResult<usize> {
        let (Some(backend), Some(staging)) = (self.backend.as_mut(), self.staging.as_mut())
        else {
            return Ok(0);
        };

        let events = {
            let loaded = self.registry.identities();
            backend.check(&loaded)
        };
        if events.is_empty() {
            return Ok(0);
        }
        debug!("Poll saw {} change events", events.len());

        let plan = ReconcilePlan::build(&events, |identity| {
            self.registry.find_by_identity(identity)
        });
        if plan.is_empty() {
            return Ok(events.len());
        }

        let summary = reconcile::apply(&plan, &mut self.registry, staging, &self.config.module_dir)
            .into_report()
            .attach(format!(
                "applying {} loads and {} unloads",
                plan.loads.len(),
                plan.unloads.len()
            ))?;

        info!(
            "Reconciled: {} loaded, {} unloaded, {} reloaded, {} failed ({} live)",
            summary.loaded,
            summary.unloaded,
            summary.reloaded,
            summary.failed,
            self.registry.live_count()
        );

        Ok(events.len())
    }
}

impl<L> Runtime<L> {
    /// Stop watching, unload every module and remove the scratch directory.
    pub fn shutdown(mut self) {
        self.teardown();
        info!("Runtime shut down");
    }

    fn teardown(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.stop();
        }

        let unloaded = self.registry.unload_all();
        if !unloaded.is_empty() {
            debug!("Unloaded {} modules during teardown", unloaded.len());
        }

        if let Some(staging) = self.staging.take() {
            discard_staging(staging);
        }
    }

    /// Number of live modules
    pub fn module_count(&self) -> usize {
        self.registry.live_count()
    }

    /// Read-only view of every live module, in slot order
    pub fn modules(&self) -> Vec<ModuleInfo> {
        self.registry.infos()
    }

    /// Read-only view of one live module
    pub fn module(&self, identity: &str) -> Option<ModuleInfo> {
        self.registry.info(identity)
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModuleRegistry<L> {
        &self.registry
    }

    /// Active watch strategy, `None` after teardown
    pub fn backend_kind(&self) -> Option<WatchBackendKind> {
        self.backend.as_ref().map(|backend| backend.kind())
    }
}

fn discard_staging(staging: StagingArea) {
    let root = staging.root().to_path_buf();
    if let Err(e) = staging.remove() {
        warn!("Failed to remove scratch directory {:?}: {}", root, e);
    }
}

impl<L> Drop for Runtime<L> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<L> std::fmt::Debug for Runtime<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("module_dir", &self.config.module_dir)
            .field("registry", &self.registry)
            .field("backend", &self.backend_kind())
            .finish_non_exhaustive()
    }
}
