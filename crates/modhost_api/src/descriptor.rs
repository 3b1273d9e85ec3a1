//! Explicit type registration records.
//!
//! A module describes every type it exports with a [`TypeDescriptor`]:
//! the capabilities it is assignable to, its declared priority, structural
//! traits used by catalog filters, and the typed constructors the host may
//! call. Nothing is discovered by introspection.

use crate::{CoreMod, ModuleError, ModuleLogger, Plugin, ServiceProvider};
use std::fmt;
use std::sync::Arc;

/// Capability implemented by every core mod type.
pub const CORE_MOD_CAPABILITY: &str = "modhost::CoreMod";

/// Capability implemented by every plugin type.
pub const PLUGIN_CAPABILITY: &str = "modhost::Plugin";

/// Priority used when a descriptor declares none. Higher sorts first.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Parameterless core mod constructor.
pub type CoreModConstructor = fn() -> Box<dyn CoreMod>;

/// Core mod constructor taking a logger dependency.
pub type LoggerCoreModConstructor = fn(Arc<dyn ModuleLogger>) -> Box<dyn CoreMod>;

/// Plugin factory. Resolves whatever it needs from the provider.
pub type PluginFactory = fn(&dyn ServiceProvider) -> Result<Box<dyn Plugin>, ModuleError>;

/// Structural traits consulted by catalog filters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeTraits {
    pub is_abstract: bool,
    pub is_value_type: bool,
    pub is_sealed: bool,
    pub is_nested: bool,
    /// Explicitly excluded from core mod / plugin classification.
    pub excluded: bool,
}

/// How the host may instantiate a type.
#[derive(Clone, Copy)]
pub enum Activation {
    /// Catalog-only type; never instantiated by the host.
    None,
    CoreMod {
        default: Option<CoreModConstructor>,
        with_logger: Option<LoggerCoreModConstructor>,
    },
    Plugin(PluginFactory),
}

impl fmt::Debug for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Activation::None => f.write_str("None"),
            Activation::CoreMod {
                default,
                with_logger,
            } => f
                .debug_struct("CoreMod")
                .field("default", &default.is_some())
                .field("with_logger", &with_logger.is_some())
                .finish(),
            Activation::Plugin(_) => f.write_str("Plugin"),
        }
    }
}

/// Registration record for one exported type.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    name: String,
    capabilities: Vec<String>,
    priority: i32,
    traits: TypeTraits,
    activation: Activation,
}

impl TypeDescriptor {
    /// A catalog-only type with no constructors.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: Vec::new(),
            priority: DEFAULT_PRIORITY,
            traits: TypeTraits::default(),
            activation: Activation::None,
        }
    }

    /// A core mod type. Add constructors with
    /// [`with_default_constructor`](Self::with_default_constructor) and
    /// [`with_logger_constructor`](Self::with_logger_constructor).
    pub fn core_mod(name: impl Into<String>) -> Self {
        let mut descriptor = Self::new(name).implements(CORE_MOD_CAPABILITY);
        descriptor.activation = Activation::CoreMod {
            default: None,
            with_logger: None,
        };
        descriptor
    }

    /// A plugin type constructed through `factory`.
    pub fn plugin(name: impl Into<String>, factory: PluginFactory) -> Self {
        let mut descriptor = Self::new(name).implements(PLUGIN_CAPABILITY);
        descriptor.activation = Activation::Plugin(factory);
        descriptor
    }

    pub fn with_default_constructor(mut self, constructor: CoreModConstructor) -> Self {
        match &mut self.activation {
            Activation::CoreMod { default, .. } => *default = Some(constructor),
            other => {
                *other = Activation::CoreMod {
                    default: Some(constructor),
                    with_logger: None,
                }
            }
        }
        self
    }

    pub fn with_logger_constructor(mut self, constructor: LoggerCoreModConstructor) -> Self {
        match &mut self.activation {
            Activation::CoreMod { with_logger, .. } => *with_logger = Some(constructor),
            other => {
                *other = Activation::CoreMod {
                    default: None,
                    with_logger: Some(constructor),
                }
            }
        }
        self
    }

    /// Declares that this type is assignable to `capability`.
    pub fn implements(mut self, capability: impl Into<String>) -> Self {
        let capability = capability.into();
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn abstract_type(mut self) -> Self {
        self.traits.is_abstract = true;
        self
    }

    pub fn value_type(mut self) -> Self {
        self.traits.is_value_type = true;
        self
    }

    pub fn sealed(mut self) -> Self {
        self.traits.is_sealed = true;
        self
    }

    pub fn nested(mut self) -> Self {
        self.traits.is_nested = true;
        self
    }

    pub fn excluded(mut self) -> Self {
        self.traits.excluded = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> &[String] {
        &self.capabilities
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn traits(&self) -> TypeTraits {
        self.traits
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    /// Whether this type can stand in for `base`: either it is `base` itself
    /// or it declared `base` as a capability.
    pub fn is_assignable_to(&self, base: &str) -> bool {
        self.name == base || self.capabilities.iter().any(|c| c == base)
    }
}

/// Everything a module exports, produced once when the module is opened.
#[derive(Debug, Clone)]
pub struct ModuleManifest {
    name: String,
    version: String,
    types: Vec<TypeDescriptor>,
}

impl ModuleManifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            types: Vec::new(),
        }
    }

    /// Appends a type. Export order is discovery order.
    pub fn with_type(mut self, descriptor: TypeDescriptor) -> Self {
        self.types.push(descriptor);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn types(&self) -> &[TypeDescriptor] {
        &self.types
    }

    pub fn into_types(self) -> Vec<TypeDescriptor> {
        self.types
    }
}
