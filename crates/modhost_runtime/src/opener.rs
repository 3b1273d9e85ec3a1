//! Opening module files.
//!
//! [`DynamicLibraryOpener`] loads real dynamic libraries through `libloading`.
//! [`StaticModuleOpener`] serves manifests that are linked into the host
//! binary, keyed by file name, so statically bundled modules go through the
//! same discovery path as dynamic ones.

use crate::error::{HostError, HostResult};
use libloading::{Library, Symbol};
use modhost_api::{ModuleManifest, API_VERSION_SYMBOL, CREATE_MANIFEST_SYMBOL, MODULE_API_VERSION};
use std::any::Any;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Keeps a module's code mapped for as long as anything built from it lives.
pub type ModuleKeepAlive = Arc<dyn Any + Send + Sync>;

/// A module that has been opened but not yet classified.
pub struct LoadedModule {
    pub manifest: ModuleManifest,
    pub keep_alive: Option<ModuleKeepAlive>,
}

/// Strategy for turning a file into a [`LoadedModule`].
pub trait ModuleOpener: Send + Sync {
    /// Whether the file looks like a module at all. Files rejected here are
    /// silently ignored by discovery.
    fn is_module_file(&self, path: &Path) -> bool {
        has_library_extension(path)
    }

    fn open(&self, path: &Path) -> HostResult<LoadedModule>;
}

/// Returns true for `.so`, `.dll` and `.dylib` files.
pub fn has_library_extension(path: &Path) -> bool {
    match path.extension() {
        Some(extension) => {
            let ext_str = extension.to_string_lossy();
            ext_str == "so" || ext_str == "dll" || ext_str == "dylib"
        }
        None => false,
    }
}

fn load_error(path: &Path, reason: impl Into<String>) -> HostError {
    HostError::ModuleLoad {
        path: path.display().to_string(),
        reason: reason.into(),
    }
}

/// Loads modules from dynamic libraries exporting the `export_module!` symbols.
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicLibraryOpener;

impl DynamicLibraryOpener {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleOpener for DynamicLibraryOpener {
    fn open(&self, path: &Path) -> HostResult<LoadedModule> {
        debug!("Opening module library: {}", path.display());

        let library = unsafe {
            Library::new(path)
                .map_err(|e| load_error(path, format!("Failed to load library: {}", e)))?
        };

        let manifest = {
            let api_version: Symbol<unsafe extern "C" fn() -> u32> = unsafe {
                library.get(API_VERSION_SYMBOL).map_err(|e| {
                    load_error(path, format!("Failed to find modhost_api_version: {}", e))
                })?
            };

            let version = unsafe { api_version() };
            if version != MODULE_API_VERSION {
                return Err(load_error(
                    path,
                    format!(
                        "Module API version {} does not match host version {}",
                        version, MODULE_API_VERSION
                    ),
                ));
            }

            let create_manifest: Symbol<unsafe extern "C" fn() -> *mut ModuleManifest> = unsafe {
                library.get(CREATE_MANIFEST_SYMBOL).map_err(|e| {
                    load_error(path, format!("Failed to find modhost_create_manifest: {}", e))
                })?
            };

            let manifest_ptr = unsafe { create_manifest() };
            if manifest_ptr.is_null() {
                return Err(load_error(
                    path,
                    "modhost_create_manifest returned null pointer",
                ));
            }

            *unsafe { Box::from_raw(manifest_ptr) }
        };

        Ok(LoadedModule {
            manifest,
            keep_alive: Some(Arc::new(library)),
        })
    }
}

type ManifestBuilder = Arc<dyn Fn() -> Result<ModuleManifest, String> + Send + Sync>;

/// Serves in-process manifests for files with a registered file name.
#[derive(Default, Clone)]
pub struct StaticModuleOpener {
    modules: HashMap<String, ManifestBuilder>,
}

impl StaticModuleOpener {
    /// Creates an opener that serves no modules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves the manifest built by `builder` for files named `file_name`.
    pub fn with_module(mut self, file_name: impl Into<String>, builder: fn() -> ModuleManifest) -> Self {
        self.modules
            .insert(file_name.into(), Arc::new(move || Ok(builder())));
        self
    }

    /// Serves a copy of `manifest` for files named `file_name`.
    pub fn with_manifest(mut self, file_name: impl Into<String>, manifest: ModuleManifest) -> Self {
        self.modules
            .insert(file_name.into(), Arc::new(move || Ok(manifest.clone())));
        self
    }

    /// Makes files named `file_name` fail to open with `reason`.
    pub fn with_broken_module(mut self, file_name: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        self.modules
            .insert(file_name.into(), Arc::new(move || Err(reason.clone())));
        self
    }
}

impl ModuleOpener for StaticModuleOpener {
    fn open(&self, path: &Path) -> HostResult<LoadedModule> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let builder = self
            .modules
            .get(&file_name)
            .ok_or_else(|| load_error(path, "No statically linked module registered for this file"))?;

        let manifest = builder().map_err(|reason| load_error(path, reason))?;
        Ok(LoadedModule {
            manifest,
            keep_alive: None,
        })
    }
}
