use super::ProxyLink;
use crate::error::Result;
use crate::registry::{EchoUntil, WatchOptions};
use crate::types::{RemoteServer, ServerStatus};
use futures::future::join_all;
use tracing::{error, info, warn};

impl ProxyLink {
    /// Takes over one configured proxy backend.
    ///
    /// Looks up the server at `address`, makes the route `name` match its
    /// current status and watches it from then on. Returns `Ok(false)` if no
    /// such server exists.
    pub async fn watch_server(&self, name: &str, address: &str, restricted: bool) -> Result<bool> {
        let Some(server) = self.resolve(address, false).await? else {
            warn!("Can't find server {}, unable to watch its status", address);
            return Ok(false);
        };
        info!("Found server {}, watching its status", address);

        if server.is_online() {
            info!("Updating address and port of {}", name);
        } else {
            info!("{} is {}, removed it from the proxy", name, server.status);
        }
        self.reconciler.refresh(name, &server, restricted);

        self.watch(&server, WatchOptions::new().routing_name(name).restricted(restricted))
            .await?;
        Ok(true)
    }

    /// Runs [`ProxyLink::watch_server`] for every alias.
    ///
    /// `restricted` tells whether the backend with a given routing name is
    /// restricted. Failures are logged and skipped. Returns how many servers
    /// are now watched.
    pub async fn watch_configured<F>(&self, restricted: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let mut watched = 0;
        for (name, address) in self.aliases().iter() {
            match self.watch_server(name, address, restricted(name)).await {
                Ok(true) => watched += 1,
                Ok(false) => {}
                Err(e) => error!("Failed to access the server directory, not watching {}: {}", name, e),
            }
        }
        watched
    }

    /// Brings the servers `queries` refer to online, as configured for startup.
    ///
    /// Returns how many start commands were issued.
    pub async fn auto_start<S: AsRef<str>>(&self, queries: &[S]) -> usize {
        let mut started = 0;
        for query in queries {
            let query = query.as_ref();
            match self.auto_start_one(query).await {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => error!("Failed to start {}: {}", query, e),
            }
        }
        started
    }

    async fn auto_start_one(&self, query: &str) -> Result<bool> {
        let Some(server) = self.resolve(query, false).await? else {
            warn!("Can't start {}: server not found", query);
            return Ok(false);
        };
        let booting = server.has_status(ServerStatus::BOOTING);
        if !server.is_online() && !booting && !server.has_status(ServerStatus::STARTABLE) {
            error!("Can't start {}: server is {}", self.routing_name(&server), server.status);
            return Ok(false);
        }

        let subscription = self
            .watch(&server, self.options_for(&server, None, EchoUntil::AnyChange))
            .await?;
        let name = subscription.route_name(&server);

        if server.is_online() {
            if self.table().contains(&name) {
                info!("{} is already online", name);
            } else {
                info!("{} is already online, adding it to the proxy", server.address);
                self.reconciler.admit(&name, &server, subscription.restricted());
            }
            return Ok(false);
        }

        if booting {
            info!("{} is already starting", name);
            return Ok(false);
        }

        info!("Starting {}", name);
        self.directory.start(&server.id).await?;
        Ok(true)
    }

    /// Stops every online server `queries` refer to, concurrently.
    ///
    /// Returns how many stop commands succeeded.
    pub async fn auto_stop<S: AsRef<str>>(&self, queries: &[S]) -> usize {
        let mut stopping: Vec<RemoteServer> = Vec::new();
        for query in queries {
            let query = query.as_ref();
            let server = match self.resolve(query, false).await {
                Ok(Some(server)) => server,
                Ok(None) => {
                    warn!("Can't stop {}: server not found", query);
                    continue;
                }
                Err(e) => {
                    error!("Failed to stop {}: {}", query, e);
                    continue;
                }
            };
            let name = self.routing_name(&server);

            if server.has_status(ServerStatus::STARTABLE) {
                info!("{} is already offline", name);
            } else if server.has_status(ServerStatus::SHUTTING_DOWN) {
                info!("{} is already stopping", name);
            } else if !server.is_online() {
                error!("Can't stop {}: server is {}", name, server.status);
            } else {
                info!("Stopping {}", name);
                stopping.push(server);
            }
        }
        if stopping.is_empty() {
            return 0;
        }

        let results = join_all(stopping.iter().map(|server| self.directory.stop(&server.id))).await;
        let mut stopped = 0;
        for (server, result) in stopping.iter().zip(results) {
            match result {
                Ok(()) => stopped += 1,
                Err(e) => error!("Failed to stop {}: {}", server.address, e),
            }
        }
        info!("Successfully stopped {} server{}", stopped, if stopped == 1 { "" } else { "s" });
        stopped
    }
}
