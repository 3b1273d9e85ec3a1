//! The lifecycle controller.
//!
//! [`ModuleHost`] owns the loader, every constructed instance and the
//! process-wide shutdown signal. Core mods are initialized synchronously in
//! priority order, plugins are started one at a time in priority order, and
//! shutdown ends plugins concurrently before shutting core mods down in the
//! order they were started.
//!
//! The shutdown signal trips exactly once. After it has tripped every run
//! call fails with [`HostError::IllegalState`].
//!
//! Run calls and shutdowns are serialized by one lifecycle lock. A shutdown
//! trips the signal first and then waits for the lock, so a plugin whose
//! `start` is in flight settles (and is ended) before core mods go down, and
//! a second shutdown only proceeds once the first has finished.

use crate::catalog::TypeCatalog;
use crate::construction::{construct_core_mod, construct_plugin};
use crate::error::{HostError, HostResult};
use crate::loader::{CandidateType, Classification, DataFolderKind, ModuleId, ModuleLoader, ModuleRecord};
use crate::opener::ModuleKeepAlive;
use crate::priority::order_by_priority;
use crate::shutdown::{end_plugins, EndTarget, PluginShutdownStatus, ShutdownReport};
use futures::FutureExt;
use modhost_api::{CoreMod, ModuleError, Plugin, ServiceProvider, ServiceRegistry, TypeDescriptor};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashSet;
use std::future::pending;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default bound on [`ModuleHost::force_shutdown`].
pub const DEFAULT_FORCE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for [`ModuleHost`].
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// How long `force_shutdown` waits for plugins to end.
    pub force_shutdown_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            force_shutdown_timeout: DEFAULT_FORCE_SHUTDOWN_TIMEOUT,
        }
    }
}

/// Coarse host state. It only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    NotStarted,
    CoreModsRunning,
    PluginsStarting,
    Running,
    ShuttingDown,
    Shutdown,
}

impl LifecycleState {
    fn is_shutting_down(&self) -> bool {
        matches!(self, LifecycleState::ShuttingDown | LifecycleState::Shutdown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstanceKind {
    CoreMod,
    Plugin,
}

/// Where a single instance is in its lifecycle. An instance whose `end`
/// timed out stays `Stopping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstanceStatus {
    Constructed,
    Running,
    Stopping,
    Stopped,
    Failed,
}

enum InstanceHandle {
    CoreMod(Arc<dyn CoreMod>),
    Plugin(Arc<dyn Plugin>),
}

/// A constructed instance. Entries are never removed.
struct LoadedInstance {
    descriptor: Arc<TypeDescriptor>,
    module: ModuleId,
    status: InstanceStatus,
    handle: InstanceHandle,
    // Dropped after `handle`.
    keep_alive: Option<ModuleKeepAlive>,
}

impl LoadedInstance {
    fn new(candidate: &CandidateType, handle: InstanceHandle) -> Self {
        Self {
            descriptor: candidate.descriptor.clone(),
            module: candidate.module,
            status: InstanceStatus::Constructed,
            handle,
            keep_alive: candidate.keep_alive.clone(),
        }
    }

    fn info(&self) -> InstanceInfo {
        InstanceInfo {
            type_name: self.descriptor.name().to_string(),
            module: self.module,
            kind: match self.handle {
                InstanceHandle::CoreMod(_) => InstanceKind::CoreMod,
                InstanceHandle::Plugin(_) => InstanceKind::Plugin,
            },
            priority: self.descriptor.priority(),
            status: self.status,
        }
    }
}

/// Read-only view of a loaded instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceInfo {
    pub type_name: String,
    pub module: ModuleId,
    pub kind: InstanceKind,
    pub priority: i32,
    pub status: InstanceStatus,
}

/// Drives discovered modules through their lifecycle.
///
/// # Example
///
/// ```no_run
/// # async fn demo() -> modhost_runtime::HostResult<()> {
/// use modhost_api::{CancellationToken, ServiceRegistry};
/// use modhost_runtime::{DynamicLibraryOpener, ModuleHost, ModuleLoader};
///
/// let host = ModuleHost::new(ModuleLoader::new(DynamicLibraryOpener::new()));
/// host.discover_modules("modules");
///
/// let services = ServiceRegistry::new();
/// host.run_core_mods(&services)?;
/// host.run_plugins(&services, CancellationToken::new()).await?;
/// host.shutdown(0, CancellationToken::new()).await;
/// # Ok(())
/// # }
/// ```
pub struct ModuleHost {
    // Instances are declared before the loader so they drop before the
    // module records that keep their code loaded.
    core_mods: RwLock<Vec<LoadedInstance>>,
    plugins: RwLock<Vec<LoadedInstance>>,
    instantiated: Mutex<HashSet<String>>,
    state: RwLock<LifecycleState>,
    shutdown_signal: CancellationToken,
    // Held by run calls and shutdowns. Rollback runs under the guard taken by
    // `run_plugins`.
    lifecycle_lock: tokio::sync::Mutex<()>,
    config: HostConfig,
    loader: ModuleLoader,
}

impl ModuleHost {
    /// Creates a host with the default [`HostConfig`].
    pub fn new(loader: ModuleLoader) -> Self {
        Self::with_config(loader, HostConfig::default())
    }

    pub fn with_config(loader: ModuleLoader, config: HostConfig) -> Self {
        Self {
            core_mods: RwLock::new(Vec::new()),
            plugins: RwLock::new(Vec::new()),
            instantiated: Mutex::new(HashSet::new()),
            state: RwLock::new(LifecycleState::NotStarted),
            shutdown_signal: CancellationToken::new(),
            lifecycle_lock: tokio::sync::Mutex::new(()),
            config,
            loader,
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Current state. Readable at any time without blocking run calls.
    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    /// Whether any shutdown path has tripped the shutdown signal.
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_signal.is_cancelled()
    }

    /// A token that fires when shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_signal.child_token()
    }

    /// The loader that owns module records and the catalog.
    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    /// Shortcut for `loader().catalog()`.
    pub fn catalog(&self) -> Arc<TypeCatalog> {
        self.loader.catalog()
    }

    pub fn module_records(&self) -> Vec<Arc<ModuleRecord>> {
        self.loader.records()
    }

    /// Core mods followed by plugins, each in the order they were constructed.
    pub fn loaded_instances(&self) -> Vec<InstanceInfo> {
        let core_mods = self.core_mods.read();
        let plugins = self.plugins.read();
        core_mods.iter().chain(plugins.iter()).map(LoadedInstance::info).collect()
    }

    /// Number of plugin instances recorded so far. Useful as a `start_index`.
    pub fn plugin_count(&self) -> usize {
        self.plugins.read().len()
    }

    /// Loads modules under `root_directory`. See
    /// [`ModuleLoader::discover_modules`].
    ///
    /// # Returns
    ///
    /// The number of modules newly recorded by this batch.
    pub fn discover_modules(&self, root_directory: impl AsRef<Path>) -> usize {
        self.loader.discover_modules(root_directory)
    }

    /// Data folder path for a loaded module, or `None` for an unknown handle.
    pub fn get_module_data_folder(&self, id: ModuleId, kind: DataFolderKind) -> Option<PathBuf> {
        self.loader.get_module_data_folder(id, kind)
    }

    /// Constructs and initializes every core mod not yet instantiated, in
    /// descending priority order. Per-type failures are logged and isolated.
    pub fn run_core_mods(&self, services: &ServiceRegistry) -> HostResult<()> {
        self.ensure_accepting_runs("run_core_mods")?;
        let _lifecycle = self.lifecycle_lock.try_lock().map_err(|_| {
            HostError::IllegalState("another run call is already in progress".to_string())
        })?;
        {
            let mut state = self.state.write();
            if *state == LifecycleState::NotStarted {
                *state = LifecycleState::CoreModsRunning;
            }
        }

        let candidates = order_by_priority(&self.pending_candidates(Classification::CoreMod));
        info!("Running {} core mods", candidates.len());

        for candidate in candidates {
            let type_name = candidate.descriptor.name();

            let instance: Arc<dyn CoreMod> = match construct_core_mod(&candidate.descriptor, services) {
                Ok(instance) => Arc::from(instance),
                Err(e) => {
                    error!(type_name, "{}", e);
                    continue;
                }
            };
            self.instantiated.lock().insert(type_name.to_string());

            let slot = {
                let mut core_mods = self.core_mods.write();
                core_mods.push(LoadedInstance::new(
                    &candidate,
                    InstanceHandle::CoreMod(instance.clone()),
                ));
                core_mods.len() - 1
            };

            let result = catch_unwind(AssertUnwindSafe(|| instance.initialize(services)))
                .unwrap_or_else(|panic| Err(ModuleError::from_panic(panic)));

            let status = match result {
                Ok(()) => {
                    info!(type_name, priority = candidate.descriptor.priority(), "Core mod initialized");
                    InstanceStatus::Running
                }
                Err(source) => {
                    let e = HostError::Initialization {
                        type_name: type_name.to_string(),
                        source,
                    };
                    error!(type_name, "{}", e);
                    InstanceStatus::Failed
                }
            };
            self.core_mods.write()[slot].status = status;
        }

        Ok(())
    }

    /// Constructs and starts every plugin not yet instantiated, one at a
    /// time in descending priority order.
    ///
    /// A plugin that fails to construct is logged and skipped. A plugin that
    /// fails to start stops the batch: the plugins started by this call are
    /// ended, the shutdown signal trips and [`HostError::Cancelled`] is
    /// returned. Cancelling `token` stops the batch before the next plugin
    /// and also returns [`HostError::Cancelled`], leaving started plugins
    /// running. If shutdown begins while a plugin is starting, that plugin is
    /// recorded as running once `start` returns so the shutdown ends it, and
    /// [`HostError::Cancelled`] is returned.
    pub async fn run_plugins(
        &self,
        provider: &dyn ServiceProvider,
        token: CancellationToken,
    ) -> HostResult<()> {
        self.ensure_accepting_runs("run_plugins")?;
        let _lifecycle = self.lifecycle_lock.lock().await;
        // Shutdown may have begun while this call waited for the lock.
        self.ensure_accepting_runs("run_plugins")?;
        self.advance_state(LifecycleState::PluginsStarting);

        let linked = self.shutdown_signal.child_token();
        if token.is_cancelled() {
            linked.cancel();
        }
        let forwarder = {
            let caller = token.clone();
            let linked = linked.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = caller.cancelled() => linked.cancel(),
                    _ = linked.cancelled() => {}
                }
            })
        };

        let result = self.start_plugin_batch(provider, &linked).await;
        forwarder.abort();

        if result.is_ok() {
            self.advance_state(LifecycleState::Running);
        }
        result
    }

    async fn start_plugin_batch(
        &self,
        provider: &dyn ServiceProvider,
        linked: &CancellationToken,
    ) -> HostResult<()> {
        let batch_start = self.plugin_count();
        let candidates = order_by_priority(&self.pending_candidates(Classification::Plugin));
        info!("Starting {} plugins", candidates.len());

        for candidate in candidates {
            if linked.is_cancelled() {
                warn!("Plugin startup cancelled before all plugins were started");
                return Err(HostError::Cancelled);
            }

            let type_name = candidate.descriptor.name();
            let instance: Arc<dyn Plugin> = match construct_plugin(&candidate.descriptor, provider) {
                Ok(instance) => Arc::from(instance),
                Err(e) => {
                    error!(type_name, "{}", e);
                    continue;
                }
            };
            self.instantiated.lock().insert(type_name.to_string());

            let slot = {
                let mut plugins = self.plugins.write();
                plugins.push(LoadedInstance::new(
                    &candidate,
                    InstanceHandle::Plugin(instance.clone()),
                ));
                plugins.len() - 1
            };

            debug!(type_name, "Starting plugin");
            let result = AssertUnwindSafe(instance.start(linked.clone()))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(ModuleError::from_panic(panic)));

            match result {
                Ok(()) => {
                    self.plugins.write()[slot].status = InstanceStatus::Running;
                    info!(type_name, priority = candidate.descriptor.priority(), "Plugin started");
                    if linked.is_cancelled() {
                        warn!(type_name, "Plugin startup cancelled while a plugin was starting");
                        return Err(HostError::Cancelled);
                    }
                }
                Err(source) => {
                    self.plugins.write()[slot].status = InstanceStatus::Failed;
                    let e = HostError::Startup {
                        type_name: type_name.to_string(),
                        source,
                    };
                    error!(type_name, "{}", e);
                    warn!("Rolling back {} plugins started in this batch", slot - batch_start);

                    self.begin_shutdown();
                    self.shutdown_locked(batch_start, None, None).await;
                    return Err(HostError::Cancelled);
                }
            }
        }

        Ok(())
    }

    /// Trips the shutdown signal, ends running plugins from `start_index`
    /// concurrently and then shuts down core mods. Waits until every plugin
    /// has settled or `token` is cancelled. Calling it again is harmless: a
    /// call made while another shutdown is in progress waits for it and then
    /// finds nothing left to stop.
    ///
    /// # Arguments
    ///
    /// * `start_index` - First plugin slot to end, see [`plugin_count`](Self::plugin_count)
    /// * `token` - Stops the wait early; plugins still ending are reported as timed out
    pub async fn shutdown(&self, start_index: usize, token: CancellationToken) -> ShutdownReport {
        info!("Shutting down modules");
        self.shutdown_with(start_index, None, Some(token)).await
    }

    /// Like [`shutdown`](Self::shutdown) for every plugin, but stops waiting
    /// after the configured force timeout. Plugins still ending at that point
    /// are left running and reported as timed out.
    pub async fn force_shutdown(&self) -> ShutdownReport {
        let timeout = self.config.force_shutdown_timeout;
        warn!("Forcing shutdown, waiting at most {:?} for plugins", timeout);
        self.shutdown_with(0, Some(Instant::now() + timeout), None).await
    }

    async fn shutdown_with(
        &self,
        start_index: usize,
        deadline: Option<Instant>,
        token: Option<CancellationToken>,
    ) -> ShutdownReport {
        self.begin_shutdown();

        let expired = async {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending().await,
            }
        };
        let cancelled = async {
            match &token {
                Some(token) => token.cancelled().await,
                None => pending().await,
            }
        };
        let _lifecycle = tokio::select! {
            guard = self.lifecycle_lock.lock() => guard,
            _ = expired => {
                warn!("Shutdown timeout reached while another lifecycle call was still in progress");
                return ShutdownReport::default();
            }
            _ = cancelled => {
                warn!("Shutdown wait cancelled while another lifecycle call was still in progress");
                return ShutdownReport::default();
            }
        };

        self.shutdown_locked(start_index, deadline, token).await
    }

    /// Trips the signal. The state only moves forward.
    fn begin_shutdown(&self) {
        self.shutdown_signal.cancel();
        let mut state = self.state.write();
        if *state != LifecycleState::Shutdown {
            *state = LifecycleState::ShuttingDown;
        }
    }

    /// Ends plugins and shuts core mods down. Callers hold the lifecycle lock.
    async fn shutdown_locked(
        &self,
        start_index: usize,
        deadline: Option<Instant>,
        token: Option<CancellationToken>,
    ) -> ShutdownReport {
        let targets: Vec<EndTarget> = {
            let mut plugins = self.plugins.write();
            plugins
                .iter_mut()
                .enumerate()
                .skip(start_index)
                .filter(|(_, instance)| instance.status == InstanceStatus::Running)
                .filter_map(|(slot, instance)| match &instance.handle {
                    InstanceHandle::Plugin(plugin) => {
                        instance.status = InstanceStatus::Stopping;
                        Some(EndTarget {
                            slot,
                            type_name: instance.descriptor.name().to_string(),
                            plugin: plugin.clone(),
                            keep_alive: instance.keep_alive.clone(),
                        })
                    }
                    InstanceHandle::CoreMod(_) => None,
                })
                .collect()
        };

        let ended = end_plugins(targets, deadline, token).await;

        let mut report = ShutdownReport::default();
        {
            let mut plugins = self.plugins.write();
            for (slot, plugin_report) in ended {
                plugins[slot].status = match &plugin_report.status {
                    PluginShutdownStatus::Succeeded => InstanceStatus::Stopped,
                    PluginShutdownStatus::Faulted(_) => InstanceStatus::Failed,
                    PluginShutdownStatus::TimedOut => InstanceStatus::Stopping,
                };
                report.plugins.push(plugin_report);
            }
        }

        report.core_mods_shut_down = self.shutdown_core_mods();
        *self.state.write() = LifecycleState::Shutdown;
        report.log();
        report
    }

    fn shutdown_core_mods(&self) -> usize {
        let targets: Vec<(usize, String, Arc<dyn CoreMod>)> = self
            .core_mods
            .write()
            .iter_mut()
            .enumerate()
            .filter(|(_, instance)| {
                !matches!(instance.status, InstanceStatus::Stopping | InstanceStatus::Stopped)
            })
            .filter_map(|(slot, instance)| match &instance.handle {
                InstanceHandle::CoreMod(core_mod) => {
                    instance.status = InstanceStatus::Stopping;
                    Some((slot, instance.descriptor.name().to_string(), core_mod.clone()))
                }
                InstanceHandle::Plugin(_) => None,
            })
            .collect();

        for (slot, type_name, core_mod) in &targets {
            let result = catch_unwind(AssertUnwindSafe(|| core_mod.shutdown()))
                .unwrap_or_else(|panic| Err(ModuleError::from_panic(panic)));

            match result {
                Ok(()) => debug!(type_name = %type_name, "Core mod shut down"),
                Err(e) => {
                    let e = HostError::Shutdown {
                        type_name: type_name.clone(),
                        reason: e.to_string(),
                    };
                    error!(type_name = %type_name, "{}", e);
                }
            }
            self.core_mods.write()[*slot].status = InstanceStatus::Stopped;
        }

        targets.len()
    }

    fn ensure_accepting_runs(&self, operation: &str) -> HostResult<()> {
        if self.shutdown_signal.is_cancelled() {
            return Err(HostError::IllegalState(format!(
                "{} called after shutdown began",
                operation
            )));
        }
        Ok(())
    }

    fn advance_state(&self, next: LifecycleState) {
        let mut state = self.state.write();
        if !state.is_shutting_down() {
            *state = next;
        }
    }

    /// Candidates of `classification` not yet instantiated. Duplicate type
    /// names keep their first occurrence.
    fn pending_candidates(&self, classification: Classification) -> Vec<CandidateType> {
        let instantiated = self.instantiated.lock();
        let mut seen = HashSet::new();

        self.loader
            .candidates(classification)
            .into_iter()
            .filter(|candidate| {
                let name = candidate.descriptor.name();
                if instantiated.contains(name) {
                    return false;
                }
                if !seen.insert(name.to_string()) {
                    warn!(type_name = name, module = %candidate.module, "Duplicate type ignored");
                    return false;
                }
                true
            })
            .collect()
    }
}

impl std::fmt::Debug for ModuleHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHost")
            .field("state", &self.state())
            .field("core_mods", &self.core_mods.read().len())
            .field("plugins", &self.plugins.read().len())
            .field("config", &self.config)
            .finish()
    }
}
