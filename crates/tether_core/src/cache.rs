//! Time-limited cache of the remote server listing.
//!
//! The cache holds one *generation*: the complete listing returned by the
//! remote directory plus the instant it stops being valid. A generation is
//! replaced wholesale on refresh and patched entry by entry from push events.
//! Expiry is a timestamp checked on every read, so an expired generation
//! behaves exactly like an empty cache.

use crate::directory::RemoteDirectory;
use crate::error::Result;
use crate::types::RemoteServer;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Default lifetime of a cached listing.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// One complete listing, keyed by server id in directory order.
#[derive(Debug)]
struct CacheGeneration {
    servers: IndexMap<String, RemoteServer>,
    expires_at: Instant,
}

impl CacheGeneration {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    fn snapshot(&self) -> Vec<RemoteServer> {
        self.servers.values().cloned().collect()
    }
}

/// Cache of the remote directory listing.
///
/// All resolution reads go through this cache; nothing else lists servers
/// from the directory directly.
pub struct DirectoryCache {
    directory: Arc<dyn RemoteDirectory>,
    ttl: Duration,
    generation: RwLock<Option<CacheGeneration>>,
}

impl std::fmt::Debug for DirectoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryCache")
            .field("ttl", &self.ttl)
            .field("generation", &self.generation.read().as_ref().map(|g| g.servers.len()))
            .finish()
    }
}

impl DirectoryCache {
    pub fn new(directory: Arc<dyn RemoteDirectory>, ttl: Duration) -> Self {
        Self {
            directory,
            ttl,
            generation: RwLock::new(None),
        }
    }

    /// Returns the server listing.
    ///
    /// Serves the cached generation when it is still fresh and
    /// `force_refresh` is false. Otherwise lists from the remote directory,
    /// replaces the cache with the result and returns it. Directory errors are
    /// returned unchanged and leave the cache as it was.
    pub async fn list(&self, force_refresh: bool) -> Result<Vec<RemoteServer>> {
        if !force_refresh {
            if let Some(servers) = self.fresh_snapshot() {
                return Ok(servers);
            }
        }

        let servers = self.directory.list_servers().await?;
        debug!("Refreshed server directory: {} servers", servers.len());

        let generation = CacheGeneration {
            servers: servers
                .iter()
                .map(|server| (server.id.clone(), server.clone()))
                .collect(),
            expires_at: Instant::now() + self.ttl,
        };
        *self.generation.write() = Some(generation);

        Ok(servers)
    }

    /// Replaces the cached entry with the same id as `server`.
    ///
    /// Does nothing when there is no fresh generation or the id is not part
    /// of it; only a full listing may decide which servers exist.
    pub fn patch(&self, server: &RemoteServer) {
        let now = Instant::now();
        let mut generation = self.generation.write();
        let Some(generation) = generation.as_mut().filter(|g| g.is_fresh(now)) else {
            return;
        };
        if let Some(entry) = generation.servers.get_mut(&server.id) {
            *entry = server.clone();
        }
    }

    /// Looks up one server in the fresh generation without refreshing.
    pub fn get(&self, server_id: &str) -> Option<RemoteServer> {
        let now = Instant::now();
        self.generation
            .read()
            .as_ref()
            .filter(|g| g.is_fresh(now))
            .and_then(|g| g.servers.get(server_id).cloned())
    }

    /// Drops the cached generation so the next read refreshes.
    pub fn invalidate(&self) {
        *self.generation.write() = None;
    }

    /// Returns true if a fresh generation is cached.
    pub fn is_fresh(&self) -> bool {
        let now = Instant::now();
        self.generation.read().as_ref().is_some_and(|g| g.is_fresh(now))
    }

    fn fresh_snapshot(&self) -> Option<Vec<RemoteServer>> {
        let now = Instant::now();
        self.generation
            .read()
            .as_ref()
            .filter(|g| g.is_fresh(now))
            .map(CacheGeneration::snapshot)
    }
}
