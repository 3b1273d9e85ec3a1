//! Plugin end fan-out and shutdown reporting.

use crate::opener::ModuleKeepAlive;
use futures::FutureExt;
use modhost_api::{ModuleError, Plugin};
use serde::Serialize;
use std::fmt;
use std::future::pending;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How one plugin's `end` settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum PluginShutdownStatus {
    Succeeded,
    /// `end` returned an error or panicked.
    Faulted(String),
    /// Still pending when the host stopped waiting.
    TimedOut,
}

impl fmt::Display for PluginShutdownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginShutdownStatus::Succeeded => f.write_str("succeeded"),
            PluginShutdownStatus::Faulted(reason) => write!(f, "faulted: {}", reason),
            PluginShutdownStatus::TimedOut => f.write_str("timed out"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginShutdownReport {
    pub type_name: String,
    pub status: PluginShutdownStatus,
}

/// Outcome of a shutdown call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub plugins: Vec<PluginShutdownReport>,
    pub core_mods_shut_down: usize,
}

impl ShutdownReport {
    /// How the named plugin settled, if it was part of this shutdown.
    pub fn status_of(&self, type_name: &str) -> Option<&PluginShutdownStatus> {
        self.plugins
            .iter()
            .find(|report| report.type_name == type_name)
            .map(|report| &report.status)
    }

    pub fn timed_out(&self) -> usize {
        self.count(|status| matches!(status, PluginShutdownStatus::TimedOut))
    }

    pub fn faulted(&self) -> usize {
        self.count(|status| matches!(status, PluginShutdownStatus::Faulted(_)))
    }

    /// True when every plugin ended successfully.
    pub fn is_clean(&self) -> bool {
        self.timed_out() == 0 && self.faulted() == 0
    }

    fn count(&self, predicate: impl Fn(&PluginShutdownStatus) -> bool) -> usize {
        self.plugins.iter().filter(|r| predicate(&r.status)).count()
    }

    pub(crate) fn log(&self) {
        for report in &self.plugins {
            match &report.status {
                PluginShutdownStatus::Succeeded => {
                    info!(type_name = %report.type_name, "Plugin stopped")
                }
                PluginShutdownStatus::Faulted(reason) => {
                    error!(type_name = %report.type_name, "Plugin failed to stop: {}", reason)
                }
                PluginShutdownStatus::TimedOut => {
                    warn!(type_name = %report.type_name, "Plugin did not stop in time")
                }
            }
        }

        info!(
            "Shutdown complete: {} plugins ({} timed out, {} faulted), {} core mods",
            self.plugins.len(),
            self.timed_out(),
            self.faulted(),
            self.core_mods_shut_down
        );
    }
}

/// A running plugin about to be ended.
pub(crate) struct EndTarget {
    pub slot: usize,
    pub type_name: String,
    pub plugin: Arc<dyn Plugin>,
    pub keep_alive: Option<ModuleKeepAlive>,
}

/// Calls `end` on every target concurrently and waits until all settle, the
/// deadline passes or `token` fires. Unsettled tasks are left running and
/// reported as timed out. Results keep the order of `targets`.
pub(crate) async fn end_plugins(
    targets: Vec<EndTarget>,
    deadline: Option<Instant>,
    token: Option<CancellationToken>,
) -> Vec<(usize, PluginShutdownReport)> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut reports = Vec::with_capacity(targets.len());

    for (index, target) in targets.into_iter().enumerate() {
        reports.push((
            target.slot,
            PluginShutdownReport {
                type_name: target.type_name,
                status: PluginShutdownStatus::TimedOut,
            },
        ));

        let tx = tx.clone();
        let plugin = target.plugin;
        let keep_alive = target.keep_alive;
        tokio::spawn(async move {
            let result = AssertUnwindSafe(plugin.end(CancellationToken::new()))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(ModuleError::from_panic(panic)));

            let status = match result {
                Ok(()) => PluginShutdownStatus::Succeeded,
                Err(e) => PluginShutdownStatus::Faulted(e.to_string()),
            };
            let _ = tx.send((index, status));

            // The instance must go before the code that defines it.
            drop(plugin);
            drop(keep_alive);
        });
    }
    drop(tx);

    let expired = async {
        match deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => pending().await,
        }
    };
    let cancelled = async {
        match &token {
            Some(token) => token.cancelled().await,
            None => pending().await,
        }
    };
    tokio::pin!(expired, cancelled);

    let mut outstanding = reports.len();
    while outstanding > 0 {
        tokio::select! {
            received = rx.recv() => match received {
                Some((index, status)) => {
                    reports[index].1.status = status;
                    outstanding -= 1;
                }
                None => break,
            },
            _ = &mut expired => {
                warn!("Shutdown timeout reached with {} plugins still stopping", outstanding);
                break;
            }
            _ = &mut cancelled => {
                warn!("Shutdown wait cancelled with {} plugins still stopping", outstanding);
                break;
            }
        }
    }

    reports
}
