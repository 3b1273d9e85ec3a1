//! Turning descriptors into live instances.
//!
//! Every constructor call is wrapped in `catch_unwind`, so a module that
//! panics while being built is reported like one that returned an error.

use crate::error::{HostError, HostResult};
use modhost_api::{
    Activation, CoreMod, LoggerFactory, ModuleError, ModuleLogger, Plugin, ServiceProvider,
    ServiceProviderExt, ServiceRegistry, TracingModuleLogger, TypeDescriptor,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Builds a core mod. The parameterless constructor is preferred; the logger
/// constructor receives a logger from a registered [`LoggerFactory`] or, when
/// none is registered, a [`TracingModuleLogger`] scoped to the type name.
pub fn construct_core_mod(
    descriptor: &TypeDescriptor,
    services: &ServiceRegistry,
) -> HostResult<Box<dyn CoreMod>> {
    let type_name = descriptor.name();

    let (default, with_logger) = match descriptor.activation() {
        Activation::CoreMod {
            default,
            with_logger,
        } => (default, with_logger),
        _ => {
            return Err(HostError::ConstructorResolution {
                type_name: type_name.to_string(),
                reason: "type does not declare core mod constructors".to_string(),
            })
        }
    };

    let result = if let Some(constructor) = default {
        catch_unwind(constructor)
    } else if let Some(constructor) = with_logger {
        let logger = logger_for(type_name, services);
        catch_unwind(AssertUnwindSafe(move || constructor(logger)))
    } else {
        return Err(HostError::ConstructorResolution {
            type_name: type_name.to_string(),
            reason: "no parameterless or logger constructor".to_string(),
        });
    };

    result.map_err(|panic| HostError::Construction {
        type_name: type_name.to_string(),
        source: ModuleError::from_panic(panic),
    })
}

/// Builds a plugin through its factory, which resolves its own dependencies
/// from `provider`.
pub fn construct_plugin(
    descriptor: &TypeDescriptor,
    provider: &dyn ServiceProvider,
) -> HostResult<Box<dyn Plugin>> {
    let type_name = descriptor.name();

    let factory = match descriptor.activation() {
        Activation::Plugin(factory) => factory,
        _ => {
            return Err(HostError::ConstructorResolution {
                type_name: type_name.to_string(),
                reason: "type does not declare a plugin factory".to_string(),
            })
        }
    };

    let result = catch_unwind(AssertUnwindSafe(|| factory(provider)))
        .unwrap_or_else(|panic| Err(ModuleError::from_panic(panic)));

    result.map_err(|source| HostError::Construction {
        type_name: type_name.to_string(),
        source,
    })
}

fn logger_for(type_name: &str, services: &ServiceRegistry) -> Arc<dyn ModuleLogger> {
    match services.resolve::<dyn LoggerFactory>() {
        Some(factory) => factory.create_logger(type_name),
        None => Arc::new(TracingModuleLogger::new(type_name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use modhost_api::{CancellationToken, LogLevel};
    use parking_lot::Mutex;

    struct Quiet;

    impl CoreMod for Quiet {
        fn initialize(&self, _services: &ServiceRegistry) -> Result<(), ModuleError> {
            Ok(())
        }
    }

    struct Chatty {
        logger: Arc<dyn ModuleLogger>,
    }

    impl CoreMod for Chatty {
        fn initialize(&self, _services: &ServiceRegistry) -> Result<(), ModuleError> {
            self.logger.info("hello");
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingLogger {
        lines: Mutex<Vec<String>>,
    }

    impl ModuleLogger for RecordingLogger {
        fn log(&self, _level: LogLevel, message: &str) {
            self.lines.lock().push(message.to_string());
        }
    }

    struct RecordingFactory {
        logger: Arc<RecordingLogger>,
        categories: Mutex<Vec<String>>,
    }

    impl LoggerFactory for RecordingFactory {
        fn create_logger(&self, category: &str) -> Arc<dyn ModuleLogger> {
            self.categories.lock().push(category.to_string());
            self.logger.clone()
        }
    }

    struct Idle;

    #[async_trait]
    impl Plugin for Idle {
        async fn start(&self, _token: CancellationToken) -> Result<(), ModuleError> {
            Ok(())
        }

        async fn end(&self, _token: CancellationToken) -> Result<(), ModuleError> {
            Ok(())
        }
    }

    fn quiet() -> Box<dyn CoreMod> {
        Box::new(Quiet)
    }

    fn chatty(logger: Arc<dyn ModuleLogger>) -> Box<dyn CoreMod> {
        Box::new(Chatty { logger })
    }

    fn exploding() -> Box<dyn CoreMod> {
        panic!("constructor exploded")
    }

    fn idle(_provider: &dyn ServiceProvider) -> Result<Box<dyn Plugin>, ModuleError> {
        Ok(Box::new(Idle))
    }

    fn needs_missing(provider: &dyn ServiceProvider) -> Result<Box<dyn Plugin>, ModuleError> {
        provider.require::<String>()?;
        Ok(Box::new(Idle))
    }

    #[test]
    fn test_prefers_parameterless_constructor() {
        let descriptor = TypeDescriptor::core_mod("demo::Both")
            .with_default_constructor(quiet)
            .with_logger_constructor(chatty);
        assert!(construct_core_mod(&descriptor, &ServiceRegistry::new()).is_ok());
    }

    #[test]
    fn test_logger_constructor_uses_registered_factory() {
        let logger = Arc::new(RecordingLogger::default());
        let factory = Arc::new(RecordingFactory {
            logger: logger.clone(),
            categories: Mutex::new(Vec::new()),
        });
        let services = ServiceRegistry::new();
        services.register::<dyn LoggerFactory>(factory.clone());

        let descriptor = TypeDescriptor::core_mod("demo::Chatty").with_logger_constructor(chatty);
        let instance = construct_core_mod(&descriptor, &services).unwrap();
        instance.initialize(&services).unwrap();

        assert_eq!(*factory.categories.lock(), ["demo::Chatty"]);
        assert_eq!(*logger.lines.lock(), ["hello"]);
    }

    #[test]
    fn test_logger_constructor_falls_back_to_tracing_logger() {
        let descriptor = TypeDescriptor::core_mod("demo::Chatty").with_logger_constructor(chatty);
        assert!(construct_core_mod(&descriptor, &ServiceRegistry::new()).is_ok());
    }

    #[test]
    fn test_core_mod_without_constructor_is_a_resolution_error() {
        let descriptor = TypeDescriptor::core_mod("demo::Bare");
        let result = construct_core_mod(&descriptor, &ServiceRegistry::new());
        assert!(matches!(result, Err(HostError::ConstructorResolution { .. })));
    }

    #[test]
    fn test_panicking_constructor_is_a_construction_error() {
        let descriptor = TypeDescriptor::core_mod("demo::Boom").with_default_constructor(exploding);
        match construct_core_mod(&descriptor, &ServiceRegistry::new()) {
            Err(HostError::Construction { type_name, source }) => {
                assert_eq!(type_name, "demo::Boom");
                assert!(source.to_string().contains("constructor exploded"));
            }
            _ => panic!("expected a construction error"),
        }
    }

    #[test]
    fn test_plugin_factory_resolution() {
        let services = ServiceRegistry::new();
        assert!(construct_plugin(&TypeDescriptor::plugin("demo::Idle", idle), &services).is_ok());

        let result = construct_plugin(
            &TypeDescriptor::plugin("demo::Needy", needs_missing),
            &services,
        );
        assert!(matches!(
            result,
            Err(HostError::Construction {
                source: ModuleError::MissingService(_),
                ..
            })
        ));

        let result = construct_plugin(&TypeDescriptor::core_mod("demo::Core"), &services);
        assert!(matches!(result, Err(HostError::ConstructorResolution { .. })));
    }
}
