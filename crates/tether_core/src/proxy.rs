//! Proxy routing table and its reconciler.
//!
//! The proxy owns a live table from short routing names to backend
//! endpoints. [`ProxyReconciler`] is the only writer: it adds a route when a
//! watched server comes online and removes it when the server leaves the
//! online state. Everything else reads the table.

use crate::types::{RemoteServer, ServerStatus};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

/// One backend entry in the proxy's routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub host: String,
    pub port: u16,
    pub motd: String,
    /// Hidden from normal server-list discovery while still connectable
    pub restricted: bool,
}

impl RouteEntry {
    /// Builds a route to `server`'s current endpoint.
    ///
    /// Returns `None` if the directory reported no endpoint for the server.
    pub fn for_server(server: &RemoteServer, restricted: bool) -> Option<Self> {
        let (host, port) = server.endpoint()?;
        Some(Self {
            host: host.to_string(),
            port,
            motd: server.motd.clone(),
            restricted,
        })
    }
}

/// The proxy's live routing table.
pub trait ProxyTable: Send + Sync {
    fn contains(&self, name: &str) -> bool;

    /// Inserts or replaces the route called `name`.
    fn put(&self, name: &str, entry: RouteEntry);

    /// Removes the route called `name`, returning whether it existed.
    fn remove(&self, name: &str) -> bool;

    /// Names of all current routes.
    fn names(&self) -> Vec<String>;
}

/// In-process routing table.
#[derive(Debug, Default)]
pub struct MemoryProxyTable {
    routes: DashMap<String, RouteEntry>,
}

impl MemoryProxyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<RouteEntry> {
        self.routes.get(name).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl ProxyTable for MemoryProxyTable {
    fn contains(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    fn put(&self, name: &str, entry: RouteEntry) {
        self.routes.insert(name.to_string(), entry);
    }

    fn remove(&self, name: &str) -> bool {
        self.routes.remove(name).is_some()
    }

    fn names(&self) -> Vec<String> {
        self.routes.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// What a reconciliation did to the routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// A route was inserted
    Added,
    /// The route was removed (or was already absent)
    Removed,
    /// The routing name is taken; the existing route was left alone
    Conflict,
    /// The server is online but reported no endpoint to route to
    Unroutable,
    /// The transition does not affect routing
    Unchanged,
}

/// Sole writer of the proxy routing table.
///
/// Every read-check-write sequence runs under one lock, so two servers coming
/// online concurrently cannot both claim the same routing name.
pub struct ProxyReconciler {
    table: Arc<dyn ProxyTable>,
    guard: Mutex<()>,
}

impl std::fmt::Debug for ProxyReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyReconciler")
            .field("table", &"[proxy table]")
            .finish()
    }
}

impl ProxyReconciler {
    pub fn new(table: Arc<dyn ProxyTable>) -> Self {
        Self {
            table,
            guard: Mutex::new(()),
        }
    }

    /// Read-only view of the routing table.
    pub fn table(&self) -> &dyn ProxyTable {
        self.table.as_ref()
    }

    /// Applies one observed status transition to the routing table.
    ///
    /// Only the online edge (`old` not online, `new` online) and the offline
    /// edge (`old` online, `new` not) change anything.
    pub fn reconcile(
        &self,
        old: ServerStatus,
        new: &RemoteServer,
        routing_name: &str,
        restricted: bool,
    ) -> Reconciliation {
        let was_online = old == ServerStatus::Online;
        match (was_online, new.is_online()) {
            (false, true) => self.admit(routing_name, new, restricted),
            (true, false) => {
                self.evict(routing_name);
                Reconciliation::Removed
            }
            _ => Reconciliation::Unchanged,
        }
    }

    /// Routes an online server under `routing_name` unless the name is taken.
    pub fn admit(&self, routing_name: &str, server: &RemoteServer, restricted: bool) -> Reconciliation {
        let _guard = self.guard.lock();
        if self.table.contains(routing_name) {
            warn!(
                "Routing name {} is already taken, not routing {}",
                routing_name, server.address
            );
            return Reconciliation::Conflict;
        }
        let Some(entry) = RouteEntry::for_server(server, restricted) else {
            warn!("{} is online but has no endpoint, not routing it", server.address);
            return Reconciliation::Unroutable;
        };
        self.table.put(routing_name, entry);
        info!("{} went online, routed as {}", server.address, routing_name);
        Reconciliation::Added
    }

    /// Removes the route called `routing_name`. Idempotent.
    pub fn evict(&self, routing_name: &str) -> bool {
        let _guard = self.guard.lock();
        let removed = self.table.remove(routing_name);
        if removed {
            info!("Removed {} from the proxy", routing_name);
        }
        removed
    }

    /// Makes the route called `routing_name` match `server`'s current state.
    ///
    /// Any existing route under that name is dropped; an online server is
    /// then routed afresh. Used when taking over a backend that may carry a
    /// stale endpoint from configuration.
    pub fn refresh(&self, routing_name: &str, server: &RemoteServer, restricted: bool) -> Reconciliation {
        let _guard = self.guard.lock();
        self.table.remove(routing_name);
        if !server.is_online() {
            return Reconciliation::Removed;
        }
        match RouteEntry::for_server(server, restricted) {
            Some(entry) => {
                self.table.put(routing_name, entry);
                Reconciliation::Added
            }
            None => Reconciliation::Unroutable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lobby(status: ServerStatus) -> RemoteServer {
        let online = status == ServerStatus::Online;
        RemoteServer {
            id: "abc".to_string(),
            name: "lobby".to_string(),
            address: "lobby.example.me".to_string(),
            host: online.then(|| "node1.example.me".to_string()),
            port: online.then_some(25565),
            motd: "Welcome".to_string(),
            status,
        }
    }

    fn reconciler() -> (Arc<MemoryProxyTable>, ProxyReconciler) {
        let table = Arc::new(MemoryProxyTable::new());
        (table.clone(), ProxyReconciler::new(table))
    }

    #[test]
    fn test_online_edge_adds_route() {
        let (table, reconciler) = reconciler();
        let outcome = reconciler.reconcile(ServerStatus::Loading, &lobby(ServerStatus::Online), "lobby", true);

        assert_eq!(outcome, Reconciliation::Added);
        let route = table.get("lobby").unwrap();
        assert_eq!(route.host, "node1.example.me");
        assert_eq!(route.port, 25565);
        assert_eq!(route.motd, "Welcome");
        assert!(route.restricted);
    }

    #[test]
    fn test_offline_edge_removes_route() {
        let (table, reconciler) = reconciler();
        reconciler.reconcile(ServerStatus::Offline, &lobby(ServerStatus::Online), "lobby", false);
        let outcome = reconciler.reconcile(ServerStatus::Online, &lobby(ServerStatus::Stopping), "lobby", false);

        assert_eq!(outcome, Reconciliation::Removed);
        assert!(table.is_empty());

        // already gone
        let outcome = reconciler.reconcile(ServerStatus::Online, &lobby(ServerStatus::Offline), "lobby", false);
        assert_eq!(outcome, Reconciliation::Removed);
    }

    #[test]
    fn test_other_transitions_leave_table_alone() {
        let (table, reconciler) = reconciler();
        let pairs = [
            (ServerStatus::Starting, ServerStatus::Loading),
            (ServerStatus::Offline, ServerStatus::Starting),
            (ServerStatus::Stopping, ServerStatus::Offline),
        ];
        for (old, new) in pairs {
            assert_eq!(reconciler.reconcile(old, &lobby(new), "lobby", false), Reconciliation::Unchanged);
        }
        assert!(table.is_empty());
    }

    #[test]
    fn test_online_to_online_is_unchanged() {
        let (_, reconciler) = reconciler();
        let outcome = reconciler.reconcile(ServerStatus::Online, &lobby(ServerStatus::Online), "lobby", false);
        assert_eq!(outcome, Reconciliation::Unchanged);
    }

    #[test]
    fn test_collision_is_reported_not_overwritten() {
        let (table, reconciler) = reconciler();
        let existing = RouteEntry {
            host: "10.0.0.1".to_string(),
            port: 25565,
            motd: "other".to_string(),
            restricted: false,
        };
        table.put("lobby", existing.clone());

        let outcome = reconciler.reconcile(ServerStatus::Offline, &lobby(ServerStatus::Online), "lobby", false);
        assert_eq!(outcome, Reconciliation::Conflict);
        assert_eq!(table.get("lobby"), Some(existing));
    }

    #[test]
    fn test_online_without_endpoint_is_unroutable() {
        let (table, reconciler) = reconciler();
        let mut server = lobby(ServerStatus::Online);
        server.host = None;
        assert_eq!(reconciler.admit("lobby", &server, false), Reconciliation::Unroutable);
        assert!(!table.contains("lobby"));
    }

    #[test]
    fn test_refresh_replaces_stale_route() {
        let (table, reconciler) = reconciler();
        table.put(
            "lobby",
            RouteEntry {
                host: "stale".to_string(),
                port: 1,
                motd: String::new(),
                restricted: false,
            },
        );

        assert_eq!(reconciler.refresh("lobby", &lobby(ServerStatus::Online), false), Reconciliation::Added);
        assert_eq!(table.get("lobby").unwrap().host, "node1.example.me");

        assert_eq!(reconciler.refresh("lobby", &lobby(ServerStatus::Offline), false), Reconciliation::Removed);
        assert!(table.is_empty());
    }

    #[test]
    fn test_concurrent_admits_for_one_name_yield_single_route() {
        let (table, reconciler) = reconciler();
        let reconciler = Arc::new(reconciler);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let reconciler = reconciler.clone();
                std::thread::spawn(move || {
                    let mut server = lobby(ServerStatus::Online);
                    server.port = Some(25565 + i);
                    reconciler.admit("lobby", &server, false)
                })
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(outcomes.iter().filter(|o| **o == Reconciliation::Added).count(), 1);
        assert_eq!(table.len(), 1);
    }
}
