//! Boundary to the remote server directory.
//!
//! The HTTP and WebSocket plumbing of the remote management API lives behind
//! [`RemoteDirectory`]. The engine only needs listing, lifecycle commands and
//! a push feed of status transitions per server id.

use crate::error::DirectoryError;
use crate::types::RemoteServer;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Receives status transitions for one server id.
///
/// Called by the directory implementation from whatever task delivers push
/// events. Implementations must not block for long; the engine's dispatcher
/// only touches in-memory state.
pub trait StatusListener: Send + Sync {
    /// A push event moved the server from `old` to `new`.
    fn status_update(&self, old: &RemoteServer, new: &RemoteServer);
}

/// Opaque handle to an open push subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PushHandle {
    /// Id of the server the subscription delivers events for
    pub server_id: String,
    /// Unique per subscribe call
    pub token: u64,
}

impl PushHandle {
    /// Creates a handle with a process-unique token.
    pub fn new(server_id: impl Into<String>) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self {
            server_id: server_id.into(),
            token: COUNTER.fetch_add(1, Ordering::SeqCst),
        }
    }
}

/// The remote directory client.
///
/// Every method may perform network I/O. The engine never calls these while
/// holding one of its own locks.
#[async_trait]
pub trait RemoteDirectory: Send + Sync {
    /// Lists every server visible to this account, in the directory's order.
    async fn list_servers(&self) -> Result<Vec<RemoteServer>, DirectoryError>;

    async fn start(&self, server_id: &str) -> Result<(), DirectoryError>;

    async fn stop(&self, server_id: &str) -> Result<(), DirectoryError>;

    async fn restart(&self, server_id: &str) -> Result<(), DirectoryError>;

    /// Opens a push subscription delivering status transitions for `server_id` to `listener`.
    async fn subscribe(
        &self,
        server_id: &str,
        listener: Arc<dyn StatusListener>,
    ) -> Result<PushHandle, DirectoryError>;

    /// Closes a push subscription. Closing an unknown handle is not an error.
    async fn unsubscribe(&self, handle: PushHandle) -> Result<(), DirectoryError>;
}
