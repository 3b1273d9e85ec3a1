//! Lifecycle traits implemented by module types.

use crate::{ModuleError, ServiceRegistry};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A capability initialized synchronously and early, before any plugin starts.
///
/// Core mods patch or configure the host environment. `initialize` is called
/// once, in descending priority order, and may register services that plugins
/// resolve later. Calls must not block indefinitely; the host does not
/// enforce a deadline on them.
pub trait CoreMod: Send + Sync {
    /// Called once after construction with the host's service container.
    fn initialize(&self, services: &ServiceRegistry) -> Result<(), ModuleError>;

    /// Called during host shutdown, in the order core mods were started.
    fn shutdown(&self) -> Result<(), ModuleError> {
        Ok(())
    }
}

/// A capability with an asynchronous start/stop lifecycle.
///
/// Plugins start one at a time in descending priority order, after all core
/// mods. Cancellation is cooperative: the host never interrupts a running
/// `start`, it only cancels the token, and the plugin is expected to notice.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Starts the plugin. `token` fires when the host begins shutting down or
    /// when the caller that requested startup gives up.
    async fn start(&self, token: CancellationToken) -> Result<(), ModuleError>;

    /// Stops the plugin. Ends run concurrently with other plugins' ends and
    /// carry no ordering guarantee.
    async fn end(&self, token: CancellationToken) -> Result<(), ModuleError>;
}
