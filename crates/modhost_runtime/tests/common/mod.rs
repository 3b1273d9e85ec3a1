//! Scripted modules shared by the integration tests.
//!
//! Every scripted type is identified by a const generic ID. Behaviour is
//! driven by a [`Harness`] registered in the service container, which also
//! records what the host did to each instance.

#![allow(dead_code)]

use modhost_api::{
    async_trait, CancellationToken, CoreMod, ModuleError, ModuleManifest, Plugin, ServiceProvider,
    ServiceProviderExt, ServiceRegistry, TypeDescriptor,
};
use modhost_runtime::{HostConfig, ModuleHost, ModuleLoader, StaticModuleOpener};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Default)]
pub struct Harness {
    events: Mutex<Vec<String>>,
    start_failures: Mutex<HashSet<usize>>,
    init_failures: Mutex<HashSet<usize>>,
    hanging_ends: Mutex<HashSet<usize>>,
    slow_starts: Mutex<HashMap<usize, Duration>>,
    slow_ends: Mutex<HashMap<usize, Duration>>,
    start_tokens: Mutex<Vec<CancellationToken>>,
}

impl Harness {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_start(&self, id: usize) {
        self.start_failures.lock().insert(id);
    }

    pub fn fail_init(&self, id: usize) {
        self.init_failures.lock().insert(id);
    }

    pub fn hang_end(&self, id: usize) {
        self.hanging_ends.lock().insert(id);
    }

    /// Makes `start` sleep for `delay` without watching its token, then
    /// record `started:ID`.
    pub fn slow_start(&self, id: usize, delay: Duration) {
        self.slow_starts.lock().insert(id, delay);
    }

    pub fn slow_end(&self, id: usize, delay: Duration) {
        self.slow_ends.lock().insert(id, delay);
    }

    pub fn record(&self, event: String) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Events starting with `prefix`, e.g. `"start:"`.
    pub fn events_with(&self, prefix: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|event| event.starts_with(prefix))
            .collect()
    }

    pub fn start_tokens(&self) -> Vec<CancellationToken> {
        self.start_tokens.lock().clone()
    }

    pub fn services(self: &Arc<Self>) -> ServiceRegistry {
        let services = ServiceRegistry::new();
        services.register(self.clone());
        services
    }
}

struct ScriptedPlugin<const ID: usize> {
    harness: Arc<Harness>,
}

#[async_trait]
impl<const ID: usize> Plugin for ScriptedPlugin<ID> {
    async fn start(&self, token: CancellationToken) -> Result<(), ModuleError> {
        self.harness.record(format!("start:{}", ID));
        self.harness.start_tokens.lock().push(token);
        let delay = self.harness.slow_starts.lock().get(&ID).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
            self.harness.record(format!("started:{}", ID));
        }
        if self.harness.start_failures.lock().contains(&ID) {
            return Err(ModuleError::InitializationFailed(format!("plugin {} refused to start", ID)));
        }
        Ok(())
    }

    async fn end(&self, _token: CancellationToken) -> Result<(), ModuleError> {
        let hang = self.harness.hanging_ends.lock().contains(&ID);
        if hang {
            std::future::pending::<()>().await;
        }
        let delay = self.harness.slow_ends.lock().get(&ID).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.harness.record(format!("end:{}", ID));
        Ok(())
    }
}

fn scripted_plugin<const ID: usize>(
    provider: &dyn ServiceProvider,
) -> Result<Box<dyn Plugin>, ModuleError> {
    let harness = provider.require::<Harness>()?;
    harness.record(format!("construct:{}", ID));
    Ok(Box::new(ScriptedPlugin::<ID> { harness }))
}

struct ScriptedCoreMod<const ID: usize> {
    harness: Mutex<Option<Arc<Harness>>>,
}

impl<const ID: usize> CoreMod for ScriptedCoreMod<ID> {
    fn initialize(&self, services: &ServiceRegistry) -> Result<(), ModuleError> {
        let harness = services.require::<Harness>()?;
        harness.record(format!("init:{}", ID));
        *self.harness.lock() = Some(harness.clone());
        if harness.init_failures.lock().contains(&ID) {
            return Err(ModuleError::InitializationFailed(format!("core mod {} broke", ID)));
        }
        Ok(())
    }

    fn shutdown(&self) -> Result<(), ModuleError> {
        if let Some(harness) = self.harness.lock().as_ref() {
            harness.record(format!("shutdown:{}", ID));
        }
        Ok(())
    }
}

fn scripted_core_mod<const ID: usize>() -> Box<dyn CoreMod> {
    Box::new(ScriptedCoreMod::<ID> {
        harness: Mutex::new(None),
    })
}

pub fn plugin_name(id: usize) -> String {
    format!("test::Plugin{}", id)
}

pub fn core_mod_name(id: usize) -> String {
    format!("test::CoreMod{}", id)
}

pub fn plugin<const ID: usize>(priority: i32) -> TypeDescriptor {
    TypeDescriptor::plugin(plugin_name(ID), scripted_plugin::<ID>).with_priority(priority)
}

pub fn core_mod<const ID: usize>(priority: i32) -> TypeDescriptor {
    TypeDescriptor::core_mod(core_mod_name(ID))
        .with_default_constructor(scripted_core_mod::<ID>)
        .with_priority(priority)
}

pub fn manifest(name: &str, types: Vec<TypeDescriptor>) -> ModuleManifest {
    types
        .into_iter()
        .fold(ModuleManifest::new(name, "0.1.0"), ModuleManifest::with_type)
}

pub fn touch(dir: &Path, relative: &str) {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, b"module").unwrap();
}

fn file_name(relative: &str) -> String {
    Path::new(relative)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// A module directory served by a [`StaticModuleOpener`]. Files are created
/// on demand so tests can add modules between discovery batches.
pub struct ModuleDir {
    pub dir: TempDir,
    opener: StaticModuleOpener,
}

impl ModuleDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            opener: StaticModuleOpener::new(),
        }
    }

    /// Registers a module and creates its file at `relative`.
    pub fn with(self, relative: &str, manifest: ModuleManifest) -> Self {
        let modules = self.with_unpublished(relative, manifest);
        touch(modules.dir.path(), relative);
        modules
    }

    /// Registers a module without creating its file yet.
    pub fn with_unpublished(mut self, relative: &str, manifest: ModuleManifest) -> Self {
        self.opener = self.opener.with_manifest(file_name(relative), manifest);
        self
    }

    pub fn with_broken(mut self, relative: &str, reason: &str) -> Self {
        self.opener = self.opener.with_broken_module(file_name(relative), reason);
        touch(self.dir.path(), relative);
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn host(&self) -> ModuleHost {
        self.host_with_config(HostConfig::default())
    }

    pub fn host_with_config(&self, config: HostConfig) -> ModuleHost {
        let host = ModuleHost::with_config(ModuleLoader::new(self.opener.clone()), config);
        host.discover_modules(self.path());
        host
    }
}
