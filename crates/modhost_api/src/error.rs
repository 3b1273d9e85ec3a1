//! Errors returned by module code to the host.

/// Errors that can occur inside a core mod or plugin.
///
/// Module authors return these from constructors and lifecycle callbacks.
/// The host never propagates them directly; it wraps them into its own
/// diagnostics and decides whether the failure is isolated or aborts a batch.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// Setup work failed during `initialize` or `start`
    #[error("Module initialization failed: {0}")]
    InitializationFailed(String),
    /// Error occurred while the module was running or stopping
    #[error("Module execution error: {0}")]
    ExecutionError(String),
    /// A constructor needed a service that the provider could not supply
    #[error("Required service not available: {0}")]
    MissingService(String),
    /// The operation observed cancellation and gave up
    #[error("Module operation was cancelled")]
    Cancelled,
    /// Panic or other unexpected runtime condition
    #[error("Module runtime error: {0}")]
    Runtime(String),
}

impl ModuleError {
    /// Converts a caught panic payload into a `Runtime` error.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            format!("panicked: {}", s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            format!("panicked: {}", s)
        } else {
            "panicked with unknown payload".to_string()
        };

        ModuleError::Runtime(message)
    }
}
