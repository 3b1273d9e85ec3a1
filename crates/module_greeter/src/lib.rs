//! Sample module for modhost.
//!
//! Exports one core mod and two plugins:
//! - [`BannerCoreMod`] (priority 10) registers the shared [`Greetings`] service
//! - [`GreeterPlugin`] (priority 5) resolves it and welcomes on start
//! - [`HeartbeatPlugin`] reports its uptime when ended
//!
//! plus `greeter::Salutation`, an abstract catalog-only type that other
//! modules may query for.

use async_trait::async_trait;
use modhost_api::{
    export_module, CancellationToken, CoreMod, LoggerFactory, ModuleError, ModuleLogger,
    ModuleManifest, Plugin, ServiceProvider, ServiceProviderExt, ServiceRegistry,
    TracingModuleLogger, TypeDescriptor,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

pub const SALUTATION: &str = "greeter::Salutation";

/// Service shared between the core mod and the plugins of this module.
#[derive(Debug)]
pub struct Greetings {
    phrase: String,
    welcomes: Mutex<u32>,
}

impl Greetings {
    pub fn new(phrase: impl Into<String>) -> Self {
        Self {
            phrase: phrase.into(),
            welcomes: Mutex::new(0),
        }
    }

    /// Builds a welcome line and counts it.
    pub fn welcome(&self, who: &str) -> String {
        *self.welcomes.lock() += 1;
        format!("{}, {}!", self.phrase, who)
    }

    pub fn welcomes(&self) -> u32 {
        *self.welcomes.lock()
    }
}

fn logger_from(provider: &dyn ServiceProvider, category: &str) -> Arc<dyn ModuleLogger> {
    match provider.resolve::<dyn LoggerFactory>() {
        Some(factory) => factory.create_logger(category),
        None => Arc::new(TracingModuleLogger::new(category)),
    }
}

// ============================================================================
// Core mod: Banner
// ============================================================================

pub struct BannerCoreMod {
    logger: Arc<dyn ModuleLogger>,
}

impl BannerCoreMod {
    pub fn create(logger: Arc<dyn ModuleLogger>) -> Box<dyn CoreMod> {
        Box::new(Self { logger })
    }
}

impl CoreMod for BannerCoreMod {
    fn initialize(&self, services: &ServiceRegistry) -> Result<(), ModuleError> {
        services.register(Arc::new(Greetings::new("Welcome")));
        self.logger.info("Greetings service registered");
        Ok(())
    }

    fn shutdown(&self) -> Result<(), ModuleError> {
        self.logger.info("Banner taken down");
        Ok(())
    }
}

// ============================================================================
// Plugin: Greeter
// ============================================================================

pub struct GreeterPlugin {
    greetings: Arc<Greetings>,
    logger: Arc<dyn ModuleLogger>,
}

impl GreeterPlugin {
    pub fn create(provider: &dyn ServiceProvider) -> Result<Box<dyn Plugin>, ModuleError> {
        Ok(Box::new(Self {
            greetings: provider.require::<Greetings>()?,
            logger: logger_from(provider, "greeter::GreeterPlugin"),
        }))
    }
}

#[async_trait]
impl Plugin for GreeterPlugin {
    async fn start(&self, token: CancellationToken) -> Result<(), ModuleError> {
        if token.is_cancelled() {
            return Err(ModuleError::Cancelled);
        }
        let line = self.greetings.welcome("modhost");
        self.logger.info(&line);
        Ok(())
    }

    async fn end(&self, _token: CancellationToken) -> Result<(), ModuleError> {
        self.logger.info(&format!(
            "Shutting down. Welcomed {} times",
            self.greetings.welcomes()
        ));
        Ok(())
    }
}

// ============================================================================
// Plugin: Heartbeat
// ============================================================================

pub struct HeartbeatPlugin {
    started_at: Mutex<Option<Instant>>,
    logger: Arc<dyn ModuleLogger>,
}

impl HeartbeatPlugin {
    pub fn create(provider: &dyn ServiceProvider) -> Result<Box<dyn Plugin>, ModuleError> {
        Ok(Box::new(Self {
            started_at: Mutex::new(None),
            logger: logger_from(provider, "greeter::HeartbeatPlugin"),
        }))
    }
}

#[async_trait]
impl Plugin for HeartbeatPlugin {
    async fn start(&self, _token: CancellationToken) -> Result<(), ModuleError> {
        *self.started_at.lock() = Some(Instant::now());
        self.logger.info("Heartbeat started");
        Ok(())
    }

    async fn end(&self, _token: CancellationToken) -> Result<(), ModuleError> {
        let started_at = self
            .started_at
            .lock()
            .take()
            .ok_or_else(|| ModuleError::ExecutionError("heartbeat was never started".into()))?;
        self.logger
            .info(&format!("Heartbeat stopped after {:?}", started_at.elapsed()));
        Ok(())
    }
}

pub fn manifest() -> ModuleManifest {
    ModuleManifest::new("greeter", env!("CARGO_PKG_VERSION"))
        .with_type(TypeDescriptor::new(SALUTATION).abstract_type())
        .with_type(
            TypeDescriptor::core_mod("greeter::BannerCoreMod")
                .with_logger_constructor(BannerCoreMod::create)
                .with_priority(10),
        )
        .with_type(
            TypeDescriptor::plugin("greeter::GreeterPlugin", GreeterPlugin::create)
                .implements(SALUTATION)
                .with_priority(5),
        )
        .with_type(TypeDescriptor::plugin(
            "greeter::HeartbeatPlugin",
            HeartbeatPlugin::create,
        ))
}

export_module!(manifest);
