//! The host application: configuration, discovery, lifecycle and shutdown.

use crate::cli::CliArgs;
use crate::config::AppConfig;
use crate::logging::setup_logging;
use crate::signals::wait_for_shutdown_signal;
use anyhow::{anyhow, bail};
use modhost_api::{LoggerFactory, ServiceRegistry, TracingLoggerFactory};
use modhost_runtime::{
    Classification, DynamicLibraryOpener, HostError, ModuleHost, ModuleLoader, ShutdownReport,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// The host process: configuration, logging and one [`ModuleHost`].
pub struct Application {
    args: CliArgs,
    config: AppConfig,
    host: ModuleHost,
}

impl Application {
    /// Loads and validates configuration, applies CLI overrides and
    /// initializes logging.
    pub async fn new(args: CliArgs) -> anyhow::Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(module_dir) = &args.module_dir {
            config.modules.directory = module_dir.to_string_lossy().to_string();
        }
        if let Some(log_level) = &args.log_level {
            config.logging.level = log_level.clone();
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

        setup_logging(&config.logging)?;

        let loader = ModuleLoader::new(DynamicLibraryOpener::new());
        let host = ModuleHost::with_config(loader, config.to_host_config());

        info!(
            "modhost v{} | Config: {} | Modules: {}",
            env!("CARGO_PKG_VERSION"),
            args.config_path.display(),
            config.modules.directory
        );

        Ok(Self { args, config, host })
    }

    /// Runs the host until a shutdown signal arrives.
    ///
    /// Discovers modules, runs core mods, starts plugins, then waits for
    /// SIGINT/SIGTERM before shutting everything down. With `--list-types`
    /// it prints the catalog as JSON and returns after discovery.
    ///
    /// # Returns
    ///
    /// `Ok(())` after a clean or reported shutdown, or an error if plugin
    /// startup was refused.
    pub async fn run(self) -> anyhow::Result<()> {
        let loaded = self.host.discover_modules(self.config.module_directory());
        info!("Discovered {} modules", loaded);

        if self.args.list_types {
            println!("{}", serde_json::to_string_pretty(&catalog_json(&self.host))?);
            return Ok(());
        }

        let services = Arc::new(ServiceRegistry::new());
        services.register::<dyn LoggerFactory>(Arc::new(TracingLoggerFactory));

        self.host.run_core_mods(&services)?;

        // Fires on the first termination signal, or right away if signal
        // handlers cannot be installed.
        let stop = CancellationToken::new();
        let signal_task = {
            let stop = stop.clone();
            tokio::spawn(async move {
                let installed = match wait_for_shutdown_signal().await {
                    Ok(()) => true,
                    Err(e) => {
                        error!("Failed to install signal handlers: {}", e);
                        false
                    }
                };
                stop.cancel();
                installed
            })
        };

        match self.host.run_plugins(&*services, stop.clone()).await {
            Ok(()) => {}
            Err(HostError::Cancelled) if self.host.is_shutdown_requested() => {
                signal_task.abort();
                bail!("Plugin startup failed; all started modules were shut down");
            }
            Err(HostError::Cancelled) => warn!("Plugin startup interrupted"),
            Err(e) => {
                signal_task.abort();
                return Err(e.into());
            }
        }

        info!(
            "modhost is running with {} instances. Press Ctrl+C to shut down",
            self.host.loaded_instances().len()
        );
        stop.cancelled().await;
        let signals_installed = signal_task.await.unwrap_or(false);

        let report = if self.args.fast_shutdown || !signals_installed {
            self.host.force_shutdown().await
        } else {
            self.graceful_shutdown().await
        };

        if !report.is_clean() {
            warn!(
                "{} plugins did not stop cleanly",
                report.timed_out() + report.faulted()
            );
        }
        info!("modhost shutdown complete");
        Ok(())
    }

    /// Graceful shutdown that stops waiting after the configured timeout.
    async fn graceful_shutdown(&self) -> ShutdownReport {
        let timeout = self.config.graceful_shutdown_timeout();
        let give_up = CancellationToken::new();
        let timer = {
            let give_up = give_up.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                give_up.cancel();
            })
        };

        let report = self.host.shutdown(0, give_up).await;
        timer.abort();
        report
    }
}

/// The host's catalog and module records as JSON.
pub fn catalog_json(host: &ModuleHost) -> Value {
    let types: Vec<Value> = host
        .catalog()
        .snapshot()
        .iter()
        .map(|descriptor| {
            let traits = descriptor.traits();
            json!({
                "name": descriptor.name(),
                "capabilities": descriptor.capabilities(),
                "priority": descriptor.priority(),
                "classification": format!("{:?}", Classification::of(descriptor)),
                "abstract": traits.is_abstract,
                "value_type": traits.is_value_type,
                "sealed": traits.is_sealed,
                "nested": traits.is_nested,
                "excluded": traits.excluded,
            })
        })
        .collect();

    let modules: Vec<Value> = host
        .module_records()
        .iter()
        .map(|record| {
            json!({
                "id": record.id(),
                "name": record.name(),
                "version": record.version(),
                "path": record.relative_path().display().to_string(),
                "core_mods": record.core_mod_types().len(),
                "plugins": record.plugin_types().len(),
            })
        })
        .collect();

    json!({ "modules": modules, "types": types })
}

#[cfg(test)]
mod tests {
    use super::*;
    use modhost_api::{ModuleManifest, TypeDescriptor, PLUGIN_CAPABILITY};
    use modhost_runtime::StaticModuleOpener;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_catalog_json_lists_modules_and_types() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("tools.so"), b"module").unwrap();

        let opener = StaticModuleOpener::new().with_manifest(
            "tools.so",
            ModuleManifest::new("tools", "2.0.0")
                .with_type(
                    TypeDescriptor::new("tools::Tool")
                        .implements(PLUGIN_CAPABILITY)
                        .abstract_type(),
                )
                .with_type(TypeDescriptor::new("tools::Hammer").with_priority(3).sealed()),
        );
        let host = ModuleHost::new(ModuleLoader::new(opener));
        host.discover_modules(temp_dir.path());

        let value = catalog_json(&host);

        assert_eq!(value["modules"][0]["name"], "tools");
        assert_eq!(value["modules"][0]["version"], "2.0.0");
        assert_eq!(value["modules"][0]["path"], "tools.so");
        assert_eq!(value["types"][0]["name"], "tools::Tool");
        assert_eq!(value["types"][0]["classification"], "Ignored");
        assert_eq!(value["types"][0]["abstract"], true);
        assert_eq!(value["types"][1]["priority"], 3);
        assert_eq!(value["types"][1]["sealed"], true);
    }

    #[tokio::test]
    async fn test_cli_overrides_are_applied_before_validation() {
        let temp_dir = TempDir::new().unwrap();
        let args = CliArgs {
            config_path: temp_dir.path().join("modhost.toml"),
            module_dir: Some(temp_dir.path().join("mods")),
            log_level: Some("loud".to_string()),
            json_logs: false,
            list_types: false,
            fast_shutdown: false,
        };

        match Application::new(args).await {
            Err(e) => assert!(e.to_string().contains("Invalid log level")),
            Ok(_) => panic!("invalid log level override should be rejected"),
        }
        assert!(temp_dir.path().join("modhost.toml").exists());
    }
}
