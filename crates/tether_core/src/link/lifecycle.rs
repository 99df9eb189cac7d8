use super::ProxyLink;
use crate::error::{LinkError, Result};
use crate::observer::StatusObserver;
use crate::proxy::Reconciliation;
use crate::registry::EchoUntil;
use crate::types::{RemoteServer, ServerStatus};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of [`ProxyLink::add_server`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// The server is online and was added under this name
    Added(String),
    /// The server is online but this name is already routed
    AlreadyPresent(String),
    /// The server is not online yet; it will be added under this name when it is
    Watching(String),
}

impl AddOutcome {
    pub fn routing_name(&self) -> &str {
        match self {
            AddOutcome::Added(name) | AddOutcome::AlreadyPresent(name) | AddOutcome::Watching(name) => name,
        }
    }
}

impl ProxyLink {
    /// Starts `server` and watches it so it joins the proxy once online.
    ///
    /// Returns `Ok(false)` without doing anything unless the server is
    /// offline or crashed.
    pub async fn start_server(&self, server: &RemoteServer, echo: Option<Arc<dyn StatusObserver>>) -> Result<bool> {
        if !server.has_status(ServerStatus::STARTABLE) {
            return Ok(false);
        }
        self.watch(server, self.options_for(server, echo, EchoUntil::Status(ServerStatus::Online)))
            .await?;
        self.directory.start(&server.id).await?;
        info!("Starting {}", server.address);
        Ok(true)
    }

    /// Stops `server`; its route is removed when it leaves the online state.
    ///
    /// Returns `Ok(false)` unless the server is online.
    pub async fn stop_server(&self, server: &RemoteServer, echo: Option<Arc<dyn StatusObserver>>) -> Result<bool> {
        if !server.is_online() {
            return Ok(false);
        }
        self.watch(server, self.options_for(server, echo, EchoUntil::Status(ServerStatus::Offline)))
            .await?;
        self.directory.stop(&server.id).await?;
        info!("Stopping {}", server.address);
        Ok(true)
    }

    /// Restarts `server`. Returns `Ok(false)` unless it is online.
    pub async fn restart_server(&self, server: &RemoteServer, echo: Option<Arc<dyn StatusObserver>>) -> Result<bool> {
        if !server.is_online() {
            return Ok(false);
        }
        self.watch(server, self.options_for(server, echo, EchoUntil::Status(ServerStatus::Online)))
            .await?;
        self.directory.restart(&server.id).await?;
        info!("Restarting {}", server.address);
        Ok(true)
    }

    /// Watches `server` and adds it to the proxy now if it is online.
    ///
    /// An already watched server keeps the routing name and restriction it
    /// is watched with.
    pub async fn add_server(&self, server: &RemoteServer, echo: Option<Arc<dyn StatusObserver>>) -> Result<AddOutcome> {
        let subscription = self
            .watch(server, self.options_for(server, echo, EchoUntil::Status(ServerStatus::Online)))
            .await?;
        let name = subscription.route_name(server);

        if !server.is_online() {
            return Ok(AddOutcome::Watching(name));
        }
        Ok(match self.reconciler.admit(&name, server, subscription.restricted()) {
            Reconciliation::Added => AddOutcome::Added(name),
            Reconciliation::Conflict => AddOutcome::AlreadyPresent(name),
            _ => AddOutcome::Watching(name),
        })
    }

    /// Removes the route `routing_name` and stops watching its server.
    ///
    /// Returns `Ok(false)` if the proxy has no such route.
    pub async fn remove_server(&self, routing_name: &str) -> Result<bool> {
        if routing_name.is_empty() {
            return Err(LinkError::InvalidArgument("routing name must not be empty"));
        }
        if !self.table().contains(routing_name) {
            return Ok(false);
        }
        match self.resolve(routing_name, false).await? {
            Some(server) => self.unwatch(&server.id).await?,
            None => debug!("No remote server behind {}, only removing the route", routing_name),
        }
        self.reconciler.evict(routing_name);
        Ok(true)
    }

    /// Brings `server` online if needed and returns the name it is routed under.
    ///
    /// Suspends until the server is online when it is booting or had to be
    /// started. A server that is shutting down, or in an unknown status,
    /// fails with [`LinkError::NotStartable`].
    ///
    /// The returned name is the one the server's subscription routes it
    /// under, which for an already watched server may differ from its alias.
    pub async fn ensure_online(&self, server: &RemoteServer, echo: Option<Arc<dyn StatusObserver>>) -> Result<String> {
        let options = self.options_for(server, echo, EchoUntil::Status(ServerStatus::Online));

        if server.is_online() {
            let subscription = self.watch(server, options).await?;
            let name = subscription.route_name(server);
            if self.reconciler.admit(&name, server, subscription.restricted()) == Reconciliation::Conflict {
                debug!("{} is already routed", name);
            }
            return Ok(name);
        }

        let startable = server.has_status(ServerStatus::STARTABLE);
        if !startable && !server.has_status(ServerStatus::BOOTING) {
            return Err(LinkError::NotStartable {
                name: server.name.clone(),
                status: server.status,
            });
        }

        let subscription = self.watch(server, options).await?;
        let name = subscription.route_name(server);
        let waiter = subscription.wait_for(ServerStatus::Online);

        // went online between the caller's listing and the waiter being registered
        if let Some(current) = self.cache.get(&server.id).filter(RemoteServer::is_online) {
            self.reconciler.admit(&name, &current, subscription.restricted());
            return Ok(name);
        }

        if startable {
            info!("Starting {} to switch to it", server.address);
            self.directory.start(&server.id).await?;
        } else {
            info!("Waiting for {} to finish booting", server.address);
        }

        let online = waiter.await?;
        if !self.table().contains(&name) {
            warn!("{} is online but not routed as {}", online.address, name);
        }
        Ok(name)
    }
}
