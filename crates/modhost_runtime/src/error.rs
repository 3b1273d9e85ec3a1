//! Host-side error taxonomy.

use modhost_api::ModuleError;

/// Errors produced while loading, constructing and driving modules.
///
/// Only [`HostError::IllegalState`] and [`HostError::Cancelled`] are ever
/// returned from the run calls. Every other variant describes a per-item
/// failure that the host logs and contains.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// A module file could not be opened; the module is skipped
    #[error("Failed to load module {path}: {reason}")]
    ModuleLoad { path: String, reason: String },
    /// A core mod type has no constructor the host can call
    #[error("No usable constructor for {type_name}: {reason}")]
    ConstructorResolution { type_name: String, reason: String },
    /// A constructor or plugin factory failed
    #[error("Failed to construct {type_name}: {source}")]
    Construction {
        type_name: String,
        #[source]
        source: ModuleError,
    },
    /// A core mod's `initialize` failed; other core mods keep running
    #[error("Core mod {type_name} failed to initialize: {source}")]
    Initialization {
        type_name: String,
        #[source]
        source: ModuleError,
    },
    /// A plugin's `start` failed; the startup batch is rolled back
    #[error("Plugin {type_name} failed to start: {source}")]
    Startup {
        type_name: String,
        #[source]
        source: ModuleError,
    },
    /// A plugin's `end` or a core mod's `shutdown` failed or timed out
    #[error("{type_name} failed to shut down: {reason}")]
    Shutdown { type_name: String, reason: String },
    /// A run call was made after shutdown began
    #[error("Illegal lifecycle state: {0}")]
    IllegalState(String),
    /// The host aborted the caller's request
    #[error("Operation was cancelled by the module host")]
    Cancelled,
    /// The discovery root could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the host.
pub type HostResult<T> = Result<T, HostError>;
