//! In-process remote directory.
//!
//! [`LocalDirectory`] keeps its servers in memory and plays their lifecycle
//! out on spawned tasks, pushing every transition to subscribed listeners.
//! The daemon runs against it when no remote account is configured, and the
//! tests use it as their transport.

use crate::directory::{PushHandle, RemoteDirectory, StatusListener};
use crate::error::DirectoryError;
use crate::types::{RemoteServer, ServerStatus};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{debug, warn};

const START_SEQUENCE: &[ServerStatus] = &[ServerStatus::Starting, ServerStatus::Loading, ServerStatus::Online];
const STOP_SEQUENCE: &[ServerStatus] = &[ServerStatus::Stopping, ServerStatus::Saving, ServerStatus::Offline];
const RESTART_SEQUENCE: &[ServerStatus] = &[ServerStatus::Restarting, ServerStatus::Loading, ServerStatus::Online];

#[derive(Default)]
struct Counters {
    list: AtomicUsize,
    subscribe: AtomicUsize,
    unsubscribe: AtomicUsize,
}

#[derive(Default)]
struct Failures {
    list: Option<DirectoryError>,
    subscribe: Option<DirectoryError>,
    command: Option<DirectoryError>,
}

struct Inner {
    servers: RwLock<IndexMap<String, RemoteServer>>,
    listeners: Mutex<HashMap<String, Vec<(u64, Arc<dyn StatusListener>)>>>,
    /// Serializes deliveries so listeners see one server's transitions in order
    delivery: Mutex<()>,
    transition_delay: Duration,
    counters: Counters,
    failures: Mutex<Failures>,
}

/// A [`RemoteDirectory`] held entirely in memory.
///
/// Cloning yields another handle to the same directory.
#[derive(Clone)]
pub struct LocalDirectory {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LocalDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDirectory")
            .field("servers", &self.inner.servers.read().len())
            .field("transition_delay", &self.inner.transition_delay)
            .finish()
    }
}

impl LocalDirectory {
    /// Creates a directory holding `servers`, in that order.
    pub fn new(servers: Vec<RemoteServer>) -> Self {
        Self::with_transition_delay(servers, Duration::ZERO)
    }

    /// Like [`LocalDirectory::new`], pausing `delay` before each lifecycle step.
    pub fn with_transition_delay(servers: Vec<RemoteServer>, delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                servers: RwLock::new(servers.into_iter().map(|s| (s.id.clone(), s)).collect()),
                listeners: Mutex::new(HashMap::new()),
                delivery: Mutex::new(()),
                transition_delay: delay,
                counters: Counters::default(),
                failures: Mutex::new(Failures::default()),
            }),
        }
    }

    pub fn get(&self, server_id: &str) -> Option<RemoteServer> {
        self.inner.servers.read().get(server_id).cloned()
    }

    /// Moves a server to `status` and delivers the transition to its listeners.
    ///
    /// Delivery happens on the calling thread before this returns. Returns
    /// the new snapshot, or `None` for an unknown id.
    pub fn push(&self, server_id: &str, status: ServerStatus) -> Option<RemoteServer> {
        self.inner.push(server_id, status)
    }

    /// Number of `list_servers` calls so far.
    pub fn list_calls(&self) -> usize {
        self.inner.counters.list.load(Ordering::SeqCst)
    }

    /// Number of `subscribe` calls so far, failed ones included.
    pub fn subscribe_calls(&self) -> usize {
        self.inner.counters.subscribe.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.inner.counters.unsubscribe.load(Ordering::SeqCst)
    }

    /// Number of open push subscriptions for `server_id`.
    pub fn listener_count(&self, server_id: &str) -> usize {
        self.inner.listeners.lock().get(server_id).map_or(0, Vec::len)
    }

    /// Makes the next `list_servers` call fail with `error`.
    pub fn fail_next_list(&self, error: DirectoryError) {
        self.inner.failures.lock().list = Some(error);
    }

    /// Makes the next `subscribe` call fail with `error`.
    pub fn fail_next_subscribe(&self, error: DirectoryError) {
        self.inner.failures.lock().subscribe = Some(error);
    }

    /// Makes the next start, stop or restart fail with `error`.
    pub fn fail_next_command(&self, error: DirectoryError) {
        self.inner.failures.lock().command = Some(error);
    }

    fn begin(&self, server_id: &str, allowed: &[ServerStatus], sequence: &'static [ServerStatus]) -> Result<(), DirectoryError> {
        if let Some(error) = self.inner.failures.lock().command.take() {
            return Err(error);
        }
        let status = self
            .get(server_id)
            .map(|server| server.status)
            .ok_or_else(|| DirectoryError::UnknownServer(server_id.to_string()))?;
        if !status.is_any(allowed) {
            return Err(DirectoryError::Request(format!("server {server_id} is {status}")));
        }

        let inner = self.inner.clone();
        let server_id = server_id.to_string();
        tokio::spawn(async move {
            for status in sequence {
                tokio::time::sleep(inner.transition_delay).await;
                if inner.push(&server_id, *status).is_none() {
                    warn!("Server {} disappeared during a lifecycle transition", server_id);
                    return;
                }
            }
        });
        Ok(())
    }
}

impl Inner {
    fn push(&self, server_id: &str, status: ServerStatus) -> Option<RemoteServer> {
        let _delivery = self.delivery.lock();
        let (old, new) = {
            let mut servers = self.servers.write();
            let server = servers.get_mut(server_id)?;
            let old = server.clone();
            server.status = status;
            (old, server.clone())
        };

        let listeners: Vec<Arc<dyn StatusListener>> = self
            .listeners
            .lock()
            .get(server_id)
            .map(|listeners| listeners.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();
        debug!("{}: {} -> {} ({} listeners)", new.address, old.status, new.status, listeners.len());
        for listener in listeners {
            listener.status_update(&old, &new);
        }
        Some(new)
    }
}

#[async_trait]
impl RemoteDirectory for LocalDirectory {
    async fn list_servers(&self) -> Result<Vec<RemoteServer>, DirectoryError> {
        self.inner.counters.list.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.inner.failures.lock().list.take() {
            return Err(error);
        }
        Ok(self.inner.servers.read().values().cloned().collect())
    }

    async fn start(&self, server_id: &str) -> Result<(), DirectoryError> {
        self.begin(server_id, ServerStatus::STARTABLE, START_SEQUENCE)
    }

    async fn stop(&self, server_id: &str) -> Result<(), DirectoryError> {
        self.begin(server_id, &[ServerStatus::Online], STOP_SEQUENCE)
    }

    async fn restart(&self, server_id: &str) -> Result<(), DirectoryError> {
        self.begin(server_id, &[ServerStatus::Online], RESTART_SEQUENCE)
    }

    async fn subscribe(
        &self,
        server_id: &str,
        listener: Arc<dyn StatusListener>,
    ) -> Result<PushHandle, DirectoryError> {
        self.inner.counters.subscribe.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.inner.failures.lock().subscribe.take() {
            return Err(error);
        }
        if self.get(server_id).is_none() {
            return Err(DirectoryError::UnknownServer(server_id.to_string()));
        }

        let handle = PushHandle::new(server_id);
        self.inner
            .listeners
            .lock()
            .entry(server_id.to_string())
            .or_default()
            .push((handle.token, listener));
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: PushHandle) -> Result<(), DirectoryError> {
        self.inner.counters.unsubscribe.fetch_add(1, Ordering::SeqCst);
        let mut listeners = self.inner.listeners.lock();
        if let Some(entries) = listeners.get_mut(&handle.server_id) {
            entries.retain(|(token, _)| *token != handle.token);
            if entries.is_empty() {
                listeners.remove(&handle.server_id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Collect(Mutex<Vec<(ServerStatus, ServerStatus)>>);

    impl StatusListener for Collect {
        fn status_update(&self, old: &RemoteServer, new: &RemoteServer) {
            self.0.lock().push((old.status, new.status));
        }
    }

    fn server(id: &str, status: ServerStatus) -> RemoteServer {
        RemoteServer {
            id: id.to_string(),
            name: id.to_string(),
            address: format!("{id}.exaroton.me"),
            host: Some("127.0.0.1".to_string()),
            port: Some(25565),
            motd: String::new(),
            status,
        }
    }

    #[tokio::test]
    async fn test_listing_preserves_seed_order() {
        let directory = LocalDirectory::new(vec![server("b", ServerStatus::Offline), server("a", ServerStatus::Online)]);
        let ids: Vec<_> = directory.list_servers().await.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_push_reaches_subscribers_until_unsubscribed() {
        let directory = LocalDirectory::new(vec![server("a", ServerStatus::Offline)]);
        let collect = Arc::new(Collect(Mutex::new(Vec::new())));
        let handle = directory.subscribe("a", collect.clone()).await.unwrap();

        directory.push("a", ServerStatus::Starting);
        directory.unsubscribe(handle).await.unwrap();
        directory.push("a", ServerStatus::Online);

        assert_eq!(*collect.0.lock(), vec![(ServerStatus::Offline, ServerStatus::Starting)]);
        assert_eq!(directory.get("a").unwrap().status, ServerStatus::Online);
        assert!(directory.push("missing", ServerStatus::Online).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_plays_out_boot_sequence() {
        let directory = LocalDirectory::with_transition_delay(vec![server("a", ServerStatus::Offline)], Duration::from_secs(1));
        let collect = Arc::new(Collect(Mutex::new(Vec::new())));
        directory.subscribe("a", collect.clone()).await.unwrap();

        directory.start("a").await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let seen: Vec<_> = collect.0.lock().iter().map(|(_, new)| *new).collect();
        assert_eq!(seen, START_SEQUENCE);
    }

    #[tokio::test]
    async fn test_commands_check_current_status() {
        let directory = LocalDirectory::new(vec![server("a", ServerStatus::Online)]);
        assert!(matches!(directory.start("a").await, Err(DirectoryError::Request(_))));
        assert_eq!(
            directory.stop("missing").await,
            Err(DirectoryError::UnknownServer("missing".to_string()))
        );

        directory.fail_next_command(DirectoryError::RateLimited);
        assert_eq!(directory.stop("a").await, Err(DirectoryError::RateLimited));
    }

    #[tokio::test]
    async fn test_subscribe_unknown_server_fails() {
        let directory = LocalDirectory::new(vec![]);
        let collect = Arc::new(Collect(Mutex::new(Vec::new())));
        assert!(directory.subscribe("a", collect).await.is_err());
        assert_eq!(directory.subscribe_calls(), 1);
    }
}
