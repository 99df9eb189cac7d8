//! # Subscription Registry
//!
//! One [`Subscription`] per watched server id, each owning exactly one push
//! subscription at the remote directory. Every transition the directory
//! pushes is dispatched in four steps under the subscription's lock:
//!
//! 1. patch the directory cache with the new snapshot
//! 2. resolve the waiters keyed by the new status
//! 3. reconcile the proxy routing table
//! 4. notify the echo target, clearing it once its condition is met
//!
//! Watching an already watched server only updates the existing record.
//! Only the `watch` call that created a record subscribes at the directory;
//! other callers wait until it has, and share its outcome. An `unwatch` that
//! arrives while that call is still subscribing is finished by it.

mod subscription;
mod waiter;

pub use subscription::{Echo, EchoUntil, Subscription, WatchOptions};
pub use waiter::StatusWaiter;

use crate::cache::DirectoryCache;
use crate::directory::{RemoteDirectory, StatusListener};
use crate::error::{LinkError, Result};
use crate::proxy::ProxyReconciler;
use crate::types::RemoteServer;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Registry of watched servers.
pub struct SubscriptionRegistry {
    directory: Arc<dyn RemoteDirectory>,
    cache: Arc<DirectoryCache>,
    reconciler: Arc<ProxyReconciler>,
    subscriptions: DashMap<String, Arc<Subscription>>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

impl SubscriptionRegistry {
    pub fn new(
        directory: Arc<dyn RemoteDirectory>,
        cache: Arc<DirectoryCache>,
        reconciler: Arc<ProxyReconciler>,
    ) -> Self {
        Self {
            directory,
            cache,
            reconciler,
            subscriptions: DashMap::new(),
        }
    }

    /// Starts watching `server`, or updates the existing watch.
    ///
    /// A repeated call returns the same [`Subscription`] and never subscribes
    /// at the directory again. It keeps the first non-empty routing name and
    /// replaces the echo target only when `options` carries one. The
    /// `restricted` flag is fixed by the first call.
    ///
    /// Returns only once the push subscription is open, so a waiter
    /// registered on the result sees every later transition.
    pub async fn watch(&self, server: &RemoteServer, options: WatchOptions) -> Result<Arc<Subscription>> {
        if server.id.is_empty() {
            return Err(LinkError::InvalidArgument("server id must not be empty"));
        }

        let created = match self.subscriptions.entry(server.id.clone()) {
            Entry::Occupied(entry) => {
                let subscription = entry.get().clone();
                drop(entry);
                subscription.update(options);
                subscription.until_open().await?;
                return Ok(subscription);
            }
            Entry::Vacant(entry) => {
                let subscription = Arc::new(Subscription::new(
                    server.id.clone(),
                    options,
                    self.cache.clone(),
                    self.reconciler.clone(),
                ));
                entry.insert(subscription.clone());
                subscription
            }
        };

        let listener: Arc<dyn StatusListener> = created.clone();
        let handle = match self.directory.subscribe(&server.id, listener).await {
            Ok(handle) => handle,
            Err(e) => {
                self.subscriptions
                    .remove_if(&server.id, |_, current| Arc::ptr_eq(current, &created));
                created.close();
                let error = LinkError::from(e);
                created.settle(Err(error.clone()));
                return Err(error);
            }
        };

        if let Some(handle) = created.opened(handle) {
            debug!("{} was unwatched while subscribing, closing its push subscription", server.address);
            let closed = LinkError::WatchClosed(server.id.clone());
            created.settle(Err(closed.clone()));
            self.directory.unsubscribe(handle).await?;
            return Err(closed);
        }
        created.settle(Ok(()));

        info!("Watching status changes of {}", server.address);
        Ok(created)
    }

    /// Stops watching the server with `server_id`. Does nothing if it is not watched.
    ///
    /// Pending waiters of the subscription resolve with
    /// [`LinkError::WatchClosed`].
    pub async fn unwatch(&self, server_id: &str) -> Result<()> {
        if server_id.is_empty() {
            return Err(LinkError::InvalidArgument("server id must not be empty"));
        }
        let Some((_, subscription)) = self.subscriptions.remove(server_id) else {
            return Ok(());
        };

        if let Some(handle) = subscription.close() {
            self.directory.unsubscribe(handle).await?;
        }
        info!("Stopped watching {}", server_id);
        Ok(())
    }

    /// Unwatches every server, logging failures instead of stopping at them.
    pub async fn unwatch_all(&self) {
        for server_id in self.ids() {
            if let Err(e) = self.unwatch(&server_id).await {
                error!("Failed to stop watching {}: {}", server_id, e);
            }
        }
    }

    pub fn get(&self, server_id: &str) -> Option<Arc<Subscription>> {
        self.subscriptions.get(server_id).map(|entry| entry.value().clone())
    }

    pub fn ids(&self) -> Vec<String> {
        self.subscriptions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
