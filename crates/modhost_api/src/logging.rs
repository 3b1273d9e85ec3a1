//! Logger capability handed to modules.
//!
//! A module compiled as a separate dynamic library carries its own copy of
//! `tracing` with no subscriber installed, so anything it logs directly is
//! lost. Modules log through a [`ModuleLogger`] created by the host instead.

use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Log levels for module logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Critical errors that may affect system stability
    Error,
    /// Warning conditions that should be investigated
    Warn,
    /// General informational messages
    Info,
    /// Detailed information for debugging
    Debug,
    /// Very detailed trace information
    Trace,
}

/// Structured logger capability passed to module constructors.
pub trait ModuleLogger: Send + Sync {
    /// Logs a message with the specified level.
    fn log(&self, level: LogLevel, message: &str);

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

/// Creates category-scoped loggers. Hosts may register one as a service to
/// replace the built-in [`TracingModuleLogger`].
pub trait LoggerFactory: Send + Sync {
    fn create_logger(&self, category: &str) -> Arc<dyn ModuleLogger>;
}

/// Minimal logger that forwards to the host's `tracing` subscriber, tagging
/// every event with the category it was created for.
#[derive(Debug, Clone)]
pub struct TracingModuleLogger {
    category: String,
}

impl TracingModuleLogger {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
        }
    }

    pub fn category(&self) -> &str {
        &self.category
    }
}

impl ModuleLogger for TracingModuleLogger {
    fn log(&self, level: LogLevel, message: &str) {
        let category = self.category.as_str();
        match level {
            LogLevel::Error => error!(category, "{}", message),
            LogLevel::Warn => warn!(category, "{}", message),
            LogLevel::Info => info!(category, "{}", message),
            LogLevel::Debug => debug!(category, "{}", message),
            LogLevel::Trace => trace!(category, "{}", message),
        }
    }
}

/// [`LoggerFactory`] producing [`TracingModuleLogger`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLoggerFactory;

impl LoggerFactory for TracingLoggerFactory {
    fn create_logger(&self, category: &str) -> Arc<dyn ModuleLogger> {
        Arc::new(TracingModuleLogger::new(category))
    }
}
