//! # modhost_api
//!
//! The contract between the modhost lifecycle manager and the modules it
//! loads. A module is a dynamic library that exports a [`ModuleManifest`]
//! describing its types; the host classifies them, orders them by priority,
//! constructs them and drives their lifecycle.
//!
//! ## Writing a module
//!
//! ```rust,no_run
//! use modhost_api::*;
//! use std::sync::Arc;
//!
//! struct Banner {
//!     logger: Arc<dyn ModuleLogger>,
//! }
//!
//! impl CoreMod for Banner {
//!     fn initialize(&self, _services: &ServiceRegistry) -> Result<(), ModuleError> {
//!         self.logger.info("banner installed");
//!         Ok(())
//!     }
//! }
//!
//! fn banner(logger: Arc<dyn ModuleLogger>) -> Box<dyn CoreMod> {
//!     Box::new(Banner { logger })
//! }
//!
//! fn manifest() -> ModuleManifest {
//!     ModuleManifest::new("banner", "0.1.0").with_type(
//!         TypeDescriptor::core_mod("banner::Banner")
//!             .with_logger_constructor(banner)
//!             .with_priority(10),
//!     )
//! }
//!
//! export_module!(manifest);
//! ```

pub mod descriptor;
pub mod error;
pub mod logging;
pub mod module;
pub mod services;

pub use descriptor::{
    Activation, CoreModConstructor, LoggerCoreModConstructor, ModuleManifest, PluginFactory,
    TypeDescriptor, TypeTraits, CORE_MOD_CAPABILITY, DEFAULT_PRIORITY, PLUGIN_CAPABILITY,
};
pub use error::ModuleError;
pub use logging::{LogLevel, LoggerFactory, ModuleLogger, TracingLoggerFactory, TracingModuleLogger};
pub use module::{CoreMod, Plugin};
pub use services::{ServiceProvider, ServiceProviderExt, ServiceRegistry};

pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;

/// Version of the module contract. The host refuses modules built against a
/// different version.
pub const MODULE_API_VERSION: u32 = 1;

/// Symbol exporting the API version a module was built against.
pub const API_VERSION_SYMBOL: &[u8] = b"modhost_api_version";

/// Symbol exporting the manifest constructor.
pub const CREATE_MANIFEST_SYMBOL: &[u8] = b"modhost_create_manifest";

/// Exports the C entry points the host looks up when opening a module.
///
/// `$builder` is a path to a `fn() -> ModuleManifest`. This generates:
/// - `modhost_api_version()` - the [`MODULE_API_VERSION`] the module was built with
/// - `modhost_create_manifest()` - a heap-allocated manifest, or null if the
///   builder panicked
#[macro_export]
macro_rules! export_module {
    ($builder:path) => {
        #[no_mangle]
        pub extern "C" fn modhost_api_version() -> u32 {
            $crate::MODULE_API_VERSION
        }

        /// # Safety
        ///
        /// The returned pointer is owned by the caller and must be released
        /// with `Box::from_raw` by a host built against the same API version.
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub unsafe extern "C" fn modhost_create_manifest() -> *mut $crate::ModuleManifest {
            // Panics must not unwind across the FFI boundary.
            match ::std::panic::catch_unwind(|| $builder()) {
                Ok(manifest) => ::std::boxed::Box::into_raw(::std::boxed::Box::new(manifest)),
                Err(_) => ::std::ptr::null_mut(),
            }
        }
    };
}
