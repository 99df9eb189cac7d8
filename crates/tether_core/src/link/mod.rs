//! # Proxy Link
//!
//! [`ProxyLink`] bundles the directory cache, the query resolver, the
//! subscription registry and the proxy reconciler behind one handle. Build it
//! once at startup and share it as `Arc<ProxyLink>`.
//!
//! The implementation is split by concern:
//!
//! - this module: construction, resolution and watching
//! - `lifecycle`: start/stop/restart and adding servers to the proxy
//! - `startup`: syncing configured backends and auto start/stop

mod lifecycle;
mod startup;

pub use lifecycle::AddOutcome;

use crate::cache::DirectoryCache;
use crate::directory::RemoteDirectory;
use crate::error::Result;
use crate::observer::StatusObserver;
use crate::proxy::{ProxyReconciler, ProxyTable};
use crate::registry::{EchoUntil, StatusWaiter, Subscription, SubscriptionRegistry, WatchOptions};
use crate::resolver::{AliasTable, QueryResolver};
use crate::types::{RemoteServer, ServerStatus};
use std::sync::Arc;
use tokio::time::Duration;

/// Keeps a proxy's routing table in step with remote server lifecycles.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use std::time::Duration;
/// use tether_core::{AliasTable, LocalDirectory, MemoryProxyTable, ProxyLink};
///
/// # async fn example() -> tether_core::Result<()> {
/// let directory = Arc::new(LocalDirectory::new(Vec::new()));
/// let table = Arc::new(MemoryProxyTable::new());
/// let link = ProxyLink::new(directory, table, AliasTable::new(), Duration::from_secs(60));
///
/// if let Some(server) = link.resolve("lobby", true).await? {
///     let name = link.ensure_online(&server, None).await?;
///     println!("{} is routed as {}", server.address, name);
/// }
/// # Ok(())
/// # }
/// ```
pub struct ProxyLink {
    directory: Arc<dyn RemoteDirectory>,
    cache: Arc<DirectoryCache>,
    resolver: QueryResolver,
    reconciler: Arc<ProxyReconciler>,
    registry: SubscriptionRegistry,
}

impl std::fmt::Debug for ProxyLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyLink")
            .field("cache", &self.cache)
            .field("registry", &self.registry)
            .field("routes", &self.table().names().len())
            .finish()
    }
}

impl ProxyLink {
    pub fn new(
        directory: Arc<dyn RemoteDirectory>,
        table: Arc<dyn ProxyTable>,
        aliases: AliasTable,
        cache_ttl: Duration,
    ) -> Self {
        let cache = Arc::new(DirectoryCache::new(directory.clone(), cache_ttl));
        let reconciler = Arc::new(ProxyReconciler::new(table));
        let registry = SubscriptionRegistry::new(directory.clone(), cache.clone(), reconciler.clone());
        Self {
            directory,
            resolver: QueryResolver::new(cache.clone(), aliases),
            cache,
            reconciler,
            registry,
        }
    }

    pub fn cache(&self) -> &DirectoryCache {
        &self.cache
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn aliases(&self) -> &AliasTable {
        self.resolver.aliases()
    }

    /// The proxy routing table, read-only.
    pub fn table(&self) -> &dyn ProxyTable {
        self.reconciler.table()
    }

    /// Finds the server `query` refers to. See [`QueryResolver::resolve`].
    pub async fn resolve(&self, query: &str, force_refresh: bool) -> Result<Option<RemoteServer>> {
        self.resolver.resolve(query, force_refresh).await
    }

    /// Completion candidates for a partial server reference.
    pub async fn resolve_prefix(&self, query: &str, status_filter: Option<&[ServerStatus]>) -> Vec<String> {
        self.resolver.resolve_prefix(query, status_filter).await
    }

    /// Completion candidates among servers the proxy does not route yet.
    pub async fn completions_not_in_proxy(&self, query: &str) -> Vec<String> {
        self.resolver.completions_not_in_proxy(query, self.table()).await
    }

    /// Name `server` is routed under: its alias, else its display name.
    pub fn routing_name(&self, server: &RemoteServer) -> String {
        self.resolver.routing_name(server)
    }

    pub async fn watch(&self, server: &RemoteServer, options: WatchOptions) -> Result<Arc<Subscription>> {
        self.registry.watch(server, options).await
    }

    pub async fn unwatch(&self, server_id: &str) -> Result<()> {
        self.registry.unwatch(server_id).await
    }

    /// Registers a waiter for `status` on `subscription`.
    pub fn wait_for(&self, subscription: &Subscription, status: ServerStatus) -> StatusWaiter {
        subscription.wait_for(status)
    }

    /// Watch options routing `server` under its alias, echoing to `echo` until `until`.
    fn options_for(
        &self,
        server: &RemoteServer,
        echo: Option<Arc<dyn StatusObserver>>,
        until: EchoUntil,
    ) -> WatchOptions {
        let mut options = WatchOptions::new();
        if let Some(alias) = self.aliases().routing_name_for(&server.address) {
            options = options.routing_name(alias);
        }
        if let Some(target) = echo {
            options = options.echo(target, until);
        }
        options
    }
}
