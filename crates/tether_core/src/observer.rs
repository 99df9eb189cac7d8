//! Status change notifications for interested parties.

use crate::types::{RemoteServer, ServerStatus};
use tracing::{info, warn};

/// What a status change meant for the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// The server came online and was added to the proxy
    WentOnline,
    /// The server left the online state and its route was removed
    WentOffline,
    /// The server came online but its routing name was already taken
    RouteConflict,
    /// Any other transition
    Other,
}

/// One status transition of a watched server, as seen by an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub server_id: String,
    /// Name the server is (or would be) routed under
    pub routing_name: String,
    /// Status before the transition
    pub old: ServerStatus,
    /// Snapshot after the transition
    pub server: RemoteServer,
    pub kind: ChangeKind,
}

impl StatusChange {
    pub fn status(&self) -> ServerStatus {
        self.server.status
    }
}

/// Receives status changes for a watched server.
///
/// Called synchronously from the push dispatcher while the subscription is
/// locked. Implementations must return quickly and must not call back into
/// the engine.
pub trait StatusObserver: Send + Sync {
    fn notify(&self, change: &StatusChange);
}

/// Observer that reports changes to the log, standing in for an operator console.
#[derive(Debug, Default, Clone)]
pub struct LogObserver {
    label: Option<String>,
}

impl LogObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefixes every line with `label`, e.g. the operator that asked.
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
        }
    }

    fn prefix(&self) -> String {
        self.label.as_ref().map(|l| format!("[{l}] ")).unwrap_or_default()
    }
}

impl StatusObserver for LogObserver {
    fn notify(&self, change: &StatusChange) {
        let prefix = self.prefix();
        match change.kind {
            ChangeKind::WentOnline => info!(
                "{}{} is online and was added to the proxy as {}",
                prefix, change.server.address, change.routing_name
            ),
            ChangeKind::WentOffline => info!(
                "{}{} is {} and was removed from the proxy",
                prefix,
                change.server.address,
                change.status()
            ),
            ChangeKind::RouteConflict => warn!(
                "{}{} is online but {} is already taken in the proxy",
                prefix, change.server.address, change.routing_name
            ),
            ChangeKind::Other => info!(
                "{}{} is now {}",
                prefix,
                change.server.address,
                change.status()
            ),
        }
    }
}
