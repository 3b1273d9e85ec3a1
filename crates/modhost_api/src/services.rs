//! Service container shared between the host, core mods and plugins.
//!
//! Core mods receive the [`ServiceRegistry`] during `initialize` and may
//! register services into it. Plugin factories receive a
//! [`ServiceProvider`] and resolve whatever their constructor needs.

use parking_lot::RwLock;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

type ServiceSlot = Arc<dyn Any + Send + Sync>;

/// Dependency-resolution capability used to construct plugins.
///
/// Services are keyed by the `TypeId` of `Arc<T>`, which lets trait objects
/// (`Arc<dyn Foo>`) be stored and resolved the same way as concrete types.
/// Most callers use [`ServiceProviderExt::resolve`] instead of this method.
pub trait ServiceProvider: Send + Sync {
    fn service(&self, key: TypeId) -> Option<ServiceSlot>;
}

/// Typed helpers over [`ServiceProvider`].
pub trait ServiceProviderExt {
    /// Resolves a service registered as `Arc<T>`.
    fn resolve<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>>;

    /// Resolves a service or reports which type was missing.
    fn require<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>, crate::ModuleError> {
        self.resolve::<T>()
            .ok_or_else(|| crate::ModuleError::MissingService(type_name::<T>().to_string()))
    }
}

impl<P: ServiceProvider + ?Sized> ServiceProviderExt for P {
    fn resolve<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.service(TypeId::of::<Arc<T>>())?
            .downcast_ref::<Arc<T>>()
            .cloned()
    }
}

/// Thread-safe service container.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<TypeId, ServiceSlot>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service`, replacing any previous registration of the same type.
    pub fn register<T: ?Sized + Send + Sync + 'static>(&self, service: Arc<T>) {
        let slot: ServiceSlot = Arc::new(service);
        self.services.write().insert(TypeId::of::<Arc<T>>(), slot);
    }

    pub fn contains<T: ?Sized + Send + Sync + 'static>(&self) -> bool {
        self.services.read().contains_key(&TypeId::of::<Arc<T>>())
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}

impl ServiceProvider for ServiceRegistry {
    fn service(&self, key: TypeId) -> Option<ServiceSlot> {
        self.services.read().get(&key).cloned()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LoggerFactory, TracingLoggerFactory};

    struct Counter(u32);

    #[test]
    fn test_register_and_resolve_concrete_type() {
        let registry = ServiceRegistry::new();
        registry.register(Arc::new(Counter(7)));

        let counter = registry.resolve::<Counter>().unwrap();
        assert_eq!(counter.0, 7);
        assert!(registry.contains::<Counter>());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_and_resolve_trait_object() {
        let registry = ServiceRegistry::new();
        let factory: Arc<dyn LoggerFactory> = Arc::new(TracingLoggerFactory);
        registry.register(factory);

        assert!(registry.resolve::<dyn LoggerFactory>().is_some());
        // The concrete type was never registered on its own.
        assert!(registry.resolve::<TracingLoggerFactory>().is_none());
    }

    #[test]
    fn test_require_reports_missing_type() {
        let registry = ServiceRegistry::new();
        let err = match registry.require::<Counter>() {
            Ok(_) => panic!("nothing was registered"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("Counter"));
    }

    #[test]
    fn test_resolve_through_dyn_provider() {
        let registry = ServiceRegistry::new();
        registry.register(Arc::new(Counter(1)));
        registry.register(Arc::new(Counter(2)));

        let provider: &dyn ServiceProvider = &registry;
        assert_eq!(provider.resolve::<Counter>().unwrap().0, 2);
    }
}
