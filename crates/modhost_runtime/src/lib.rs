//! # modhost_runtime
//!
//! Loads modules from a directory, catalogs the types they export and drives
//! the core mod / plugin lifecycle.
//!
//! ## Lifecycle
//!
//! 1. [`ModuleHost::discover_modules`] opens every module file under a root
//!    directory and rebuilds the [`TypeCatalog`].
//! 2. [`ModuleHost::run_core_mods`] constructs and initializes core mods,
//!    highest priority first.
//! 3. [`ModuleHost::run_plugins`] constructs and starts plugins one at a time,
//!    highest priority first. A start failure rolls the batch back.
//! 4. [`ModuleHost::shutdown`] or [`ModuleHost::force_shutdown`] ends plugins
//!    concurrently and then shuts core mods down.
//!
//! ```rust,no_run
//! use modhost_runtime::{DynamicLibraryOpener, ModuleHost, ModuleLoader};
//! use modhost_api::{CancellationToken, ServiceRegistry};
//!
//! # async fn run() -> Result<(), modhost_runtime::HostError> {
//! let host = ModuleHost::new(ModuleLoader::new(DynamicLibraryOpener::new()));
//! host.discover_modules("modules");
//!
//! let services = ServiceRegistry::new();
//! host.run_core_mods(&services)?;
//! host.run_plugins(&services, CancellationToken::new()).await?;
//!
//! let report = host.shutdown(0, CancellationToken::new()).await;
//! assert!(report.is_clean());
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod construction;
pub mod error;
pub mod lifecycle;
pub mod loader;
pub mod opener;
pub mod priority;
pub mod shutdown;

pub use catalog::{TypeCatalog, TypeFilter};
pub use construction::{construct_core_mod, construct_plugin};
pub use error::{HostError, HostResult};
pub use lifecycle::{
    HostConfig, InstanceInfo, InstanceKind, InstanceStatus, LifecycleState, ModuleHost,
    DEFAULT_FORCE_SHUTDOWN_TIMEOUT,
};
pub use loader::{Classification, DataFolderKind, ModuleId, ModuleLoader, ModuleRecord};
pub use opener::{
    has_library_extension, DynamicLibraryOpener, LoadedModule, ModuleKeepAlive, ModuleOpener,
    StaticModuleOpener,
};
pub use priority::{order_by_priority, Prioritized};
pub use shutdown::{PluginShutdownReport, PluginShutdownStatus, ShutdownReport};
