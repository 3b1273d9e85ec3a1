//! Module discovery and classification.
//!
//! Discovery walks a root directory, opens every module file through a
//! [`ModuleOpener`], classifies the exported types and records one
//! [`ModuleRecord`] per module. Failures are per file: a module that does
//! not open is logged and skipped, the rest of the batch continues. When the
//! batch is done the [`TypeCatalog`] is rebuilt in one swap.

use crate::catalog::TypeCatalog;
use crate::error::{HostError, HostResult};
use crate::opener::{ModuleKeepAlive, ModuleOpener};
use crate::priority::Prioritized;
use modhost_api::{ModuleManifest, TypeDescriptor, CORE_MOD_CAPABILITY, PLUGIN_CAPABILITY};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Opaque handle identifying a loaded module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ModuleId(u64);

impl ModuleId {
    /// Raw numeric value, unique within one loader.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module#{}", self.0)
    }
}

/// How the host treats an exported type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    CoreMod,
    Plugin,
    Ignored,
}

impl Classification {
    /// Abstract and excluded types are ignored. Otherwise the first matching
    /// capability wins, core mod before plugin.
    pub fn of(descriptor: &TypeDescriptor) -> Self {
        let traits = descriptor.traits();
        if traits.is_abstract || traits.excluded {
            Classification::Ignored
        } else if descriptor.is_assignable_to(CORE_MOD_CAPABILITY) {
            Classification::CoreMod
        } else if descriptor.is_assignable_to(PLUGIN_CAPABILITY) {
            Classification::Plugin
        } else {
            Classification::Ignored
        }
    }
}

/// Sub-folders of a module's data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFolderKind {
    Base,
    Localization,
    Config,
    Cache,
}

impl DataFolderKind {
    fn sub_folder(&self) -> Option<&'static str> {
        match self {
            DataFolderKind::Base => None,
            DataFolderKind::Localization => Some("localization"),
            DataFolderKind::Config => Some("config"),
            DataFolderKind::Cache => Some("cache"),
        }
    }
}

/// A classified type waiting to be instantiated, tied to its module.
#[derive(Clone)]
pub struct CandidateType {
    pub descriptor: Arc<TypeDescriptor>,
    pub module: ModuleId,
    pub(crate) keep_alive: Option<ModuleKeepAlive>,
}

impl Prioritized for CandidateType {
    fn priority(&self) -> i32 {
        self.descriptor.priority()
    }
}

impl fmt::Debug for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CandidateType")
            .field("name", &self.descriptor.name())
            .field("module", &self.module)
            .finish()
    }
}

/// One successfully loaded module. Immutable once created.
pub struct ModuleRecord {
    id: ModuleId,
    name: String,
    version: String,
    path: PathBuf,
    relative_path: PathBuf,
    exported_types: Vec<Arc<TypeDescriptor>>,
    core_mod_types: Vec<Arc<TypeDescriptor>>,
    plugin_types: Vec<Arc<TypeDescriptor>>,
    keep_alive: Option<ModuleKeepAlive>,
}

impl ModuleRecord {
    fn new(
        id: ModuleId,
        path: PathBuf,
        relative_path: PathBuf,
        manifest: ModuleManifest,
        keep_alive: Option<ModuleKeepAlive>,
    ) -> Self {
        let name = manifest.name().to_string();
        let version = manifest.version().to_string();

        let mut exported_types = Vec::new();
        let mut core_mod_types = Vec::new();
        let mut plugin_types = Vec::new();

        for descriptor in manifest.into_types() {
            let descriptor = Arc::new(descriptor);
            match Classification::of(&descriptor) {
                Classification::CoreMod => core_mod_types.push(descriptor.clone()),
                Classification::Plugin => plugin_types.push(descriptor.clone()),
                Classification::Ignored => {
                    debug!(module = %name, type_name = descriptor.name(), "Ignoring exported type")
                }
            }
            exported_types.push(descriptor);
        }

        Self {
            id,
            name,
            version,
            path,
            relative_path,
            exported_types,
            core_mod_types,
            plugin_types,
            keep_alive,
        }
    }

    /// Handle for [`ModuleLoader::get_module_data_folder`].
    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// Name declared by the module's manifest.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Absolute path of the module file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path relative to the discovery root.
    pub fn relative_path(&self) -> &Path {
        &self.relative_path
    }

    /// Every type the module exports, classified or not.
    pub fn exported_types(&self) -> &[Arc<TypeDescriptor>] {
        &self.exported_types
    }

    /// Exported types classified as core mods.
    pub fn core_mod_types(&self) -> &[Arc<TypeDescriptor>] {
        &self.core_mod_types
    }

    /// Exported types classified as plugins.
    pub fn plugin_types(&self) -> &[Arc<TypeDescriptor>] {
        &self.plugin_types
    }

    pub(crate) fn candidates(&self, classification: Classification) -> Vec<CandidateType> {
        let types = match classification {
            Classification::CoreMod => &self.core_mod_types,
            Classification::Plugin => &self.plugin_types,
            Classification::Ignored => return Vec::new(),
        };

        types
            .iter()
            .map(|descriptor| CandidateType {
                descriptor: descriptor.clone(),
                module: self.id,
                keep_alive: self.keep_alive.clone(),
            })
            .collect()
    }

    fn log_summary(&self) {
        let relevant = self.core_mod_types.len() + self.plugin_types.len();
        match (self.core_mod_types.as_slice(), self.plugin_types.as_slice()) {
            ([], []) => warn!(
                module = %self.name,
                path = %self.relative_path.display(),
                "Module contains no core mods or plugins"
            ),
            ([core_mod], []) => info!(
                module = %self.name,
                "Loaded core mod {}",
                core_mod.name()
            ),
            ([], [plugin]) => info!(
                module = %self.name,
                "Loaded plugin {}",
                plugin.name()
            ),
            _ => info!(
                module = %self.name,
                core_mods = self.core_mod_types.len(),
                plugins = self.plugin_types.len(),
                "Loaded {} types from module",
                relevant
            ),
        }
    }
}

impl fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("path", &self.path)
            .field("core_mod_types", &self.core_mod_types.len())
            .field("plugin_types", &self.plugin_types.len())
            .finish()
    }
}

/// Loads modules and owns their records and the catalog built from them.
pub struct ModuleLoader {
    opener: Box<dyn ModuleOpener>,
    root_types: Vec<Arc<TypeDescriptor>>,
    records: RwLock<Vec<Arc<ModuleRecord>>>,
    catalog: Arc<TypeCatalog>,
    next_id: AtomicU64,
    /// Serializes discovery batches; readers never take it.
    discovery: Mutex<()>,
}

impl ModuleLoader {
    /// Creates a loader with an empty catalog.
    ///
    /// # Arguments
    ///
    /// * `opener` - Turns module files into manifests, usually a [`DynamicLibraryOpener`](crate::DynamicLibraryOpener)
    pub fn new(opener: impl ModuleOpener + 'static) -> Self {
        Self {
            opener: Box::new(opener),
            root_types: Vec::new(),
            records: RwLock::new(Vec::new()),
            catalog: Arc::new(TypeCatalog::new()),
            next_id: AtomicU64::new(1),
            discovery: Mutex::new(()),
        }
    }

    /// Registers the host's own types. They head every catalog rebuild.
    pub fn with_root_types(mut self, manifest: ModuleManifest) -> Self {
        self.root_types
            .extend(manifest.into_types().into_iter().map(Arc::new));
        self.catalog.replace(self.root_types.clone());
        self
    }

    /// The catalog rebuilt after every discovery batch.
    pub fn catalog(&self) -> Arc<TypeCatalog> {
        self.catalog.clone()
    }

    /// All records in discovery order.
    pub fn records(&self) -> Vec<Arc<ModuleRecord>> {
        self.records.read().clone()
    }

    /// Looks up a record by handle.
    pub fn record(&self, id: ModuleId) -> Option<Arc<ModuleRecord>> {
        self.records.read().iter().find(|r| r.id == id).cloned()
    }

    /// Loads every module file under `root_directory` and rebuilds the
    /// catalog. Returns how many new modules were recorded.
    pub fn discover_modules(&self, root_directory: impl AsRef<Path>) -> usize {
        let root = root_directory.as_ref();
        let _batch = self.discovery.lock();

        let files = match self.enumerate_module_files(root) {
            Ok(files) => files,
            Err(e) => {
                warn!("Failed to scan module directory {}: {}", root.display(), e);
                Vec::new()
            }
        };

        let known: HashSet<PathBuf> = self
            .records
            .read()
            .iter()
            .map(|r| r.path.clone())
            .collect();

        let mut discovered = Vec::new();
        for path in files {
            if known.contains(&path) {
                debug!("Module already loaded, skipping: {}", path.display());
                continue;
            }

            let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            match self.opener.open(&path) {
                Ok(loaded) => {
                    let id = ModuleId(self.next_id.fetch_add(1, Ordering::Relaxed));
                    let record = ModuleRecord::new(
                        id,
                        path,
                        relative_path,
                        loaded.manifest,
                        loaded.keep_alive,
                    );
                    record.log_summary();
                    discovered.push(Arc::new(record));
                }
                Err(e) => {
                    error!(path = %relative_path.display(), "Failed to load module: {}", e);
                }
            }
        }

        let loaded = discovered.len();
        {
            let mut records = self.records.write();
            records.extend(discovered);
            let entries = self.catalog_entries(&records);
            self.catalog.replace(entries);
        }

        info!(
            "Module discovery complete: {} new modules from {}, {} types in catalog",
            loaded,
            root.display(),
            self.catalog.len()
        );
        loaded
    }

    /// Composes the data folder path for a module. Returns `None` for
    /// handles that do not name a loaded module. Does not touch the disk.
    pub fn get_module_data_folder(&self, id: ModuleId, kind: DataFolderKind) -> Option<PathBuf> {
        let record = self.record(id)?;
        let stem = record.path.file_stem()?;
        let base = record.path.parent().unwrap_or_else(|| Path::new("")).join(stem);

        Some(match kind.sub_folder() {
            Some(sub_folder) => base.join(sub_folder),
            None => base,
        })
    }

    /// Candidates of one classification across all records, in discovery order.
    pub(crate) fn candidates(&self, classification: Classification) -> Vec<CandidateType> {
        self.records
            .read()
            .iter()
            .flat_map(|record| record.candidates(classification))
            .collect()
    }

    fn enumerate_module_files(&self, root: &Path) -> HostResult<Vec<PathBuf>> {
        if !root.exists() {
            warn!("Module directory does not exist: {}", root.display());
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => return Err(HostError::Io(e.into())),
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    continue;
                }
            };

            if entry.file_type().is_file() && self.opener.is_module_file(entry.path()) {
                files.push(entry.into_path());
            }
        }

        Ok(files)
    }

    fn catalog_entries(&self, records: &[Arc<ModuleRecord>]) -> Vec<Arc<TypeDescriptor>> {
        self.root_types
            .iter()
            .cloned()
            .chain(
                records
                    .iter()
                    .flat_map(|record| record.exported_types.iter().cloned()),
            )
            .collect()
    }
}
