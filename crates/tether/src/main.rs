//! Tether daemon entry point
//!
//! Loads the configuration, builds the proxy link against the configured
//! directory, syncs the proxy's backends at startup and stops configured
//! servers again on shutdown.

mod cli;
mod config;
mod logging;

use anyhow::{anyhow, Context, Result};
use cli::CliArgs;
use config::AppConfig;
use std::future::Future;
use std::sync::Arc;
use tether_core::{LocalDirectory, MemoryProxyTable, ProxyLink, ProxyTable};
use tokio::time::Duration;
use tracing::{error, info};

/// Interval between two status reports in the log
const REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// The running daemon.
pub struct Application {
    config: AppConfig,
    table: Arc<MemoryProxyTable>,
    link: Arc<ProxyLink>,
}

impl Application {
    /// Loads the configuration, applies CLI overrides and builds the link.
    pub async fn new(args: CliArgs) -> Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config_path)
            .await
            .with_context(|| format!("Failed to load {}", args.config_path.display()))?;

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }

        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

        Self::with_config(config)
    }

    /// Builds the link from an already validated configuration.
    pub fn with_config(config: AppConfig) -> Result<Self> {
        let servers = config.local_servers().map_err(|e| anyhow!(e))?;
        let directory = Arc::new(LocalDirectory::with_transition_delay(servers, config.transition_delay()));
        let table = Arc::new(MemoryProxyTable::new());
        let link = Arc::new(ProxyLink::new(
            directory,
            table.clone(),
            config.alias_table(),
            config.cache_ttl(),
        ));
        Ok(Self { config, table, link })
    }

    /// Syncs configured backends and starts the configured servers.
    pub async fn start(&self) {
        info!("📋 Configuration Summary:");
        info!("  🗂️ Cache TTL: {}s", self.config.directory.cache_ttl_secs);
        info!("  🏷️ Aliases: {}", self.link.aliases().len());
        info!("  🖥️ Directory servers: {}", self.config.local.servers.len());

        if self.config.watch.enabled {
            let config = &self.config;
            let watched = self.link.watch_configured(|name| config.is_restricted(name)).await;
            info!("👀 Watching {} of {} configured servers", watched, self.link.aliases().len());
        }

        if self.config.auto_start.enabled {
            let started = self.link.auto_start(&self.config.auto_start.servers).await;
            info!("🚀 Started {} servers", started);
        }
    }

    /// Stops the configured servers and closes every push subscription.
    pub async fn shutdown(&self) {
        if self.config.auto_stop.enabled {
            self.link.auto_stop(&self.config.auto_stop.servers).await;
        }
        self.link.registry().unwatch_all().await;
    }

    /// Runs until a shutdown signal arrives.
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Runs until `shutdown` resolves with the name of what ended the run.
    async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = std::io::Result<&'static str>>,
    {
        self.start().await;

        let report_handle = {
            let table = self.table.clone();
            let link = self.link.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(REPORT_INTERVAL);
                loop {
                    interval.tick().await;
                    let mut routes = table.names();
                    routes.sort();
                    info!(
                        "📊 {} routes [{}] | {} watched servers",
                        routes.len(),
                        routes.join(", "),
                        link.registry().len()
                    );
                }
            })
        };

        info!("✅ Tether is now running");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        let reason = shutdown.await;
        report_handle.abort();
        let reason = reason.context("Failed to listen for shutdown signals")?;

        info!("🛑 {} received, initiating graceful shutdown...", reason);
        self.shutdown().await;
        info!("✅ Tether shutdown complete");
        Ok(())
    }
}

/// Resolves once the process is asked to terminate.
async fn shutdown_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            interrupted = tokio::signal::ctrl_c() => interrupted.map(|()| "SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map(|()| "Ctrl+C")
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let app = Application::new(args).await?;
    logging::setup_logging(&app.config.logging)?;

    if let Err(e) = app.run().await {
        error!("❌ Application error: {:?}", e);
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LocalServerSettings, ProxyServerSettings};
    use tether_core::ServerStatus;
    use tokio::time::timeout;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.local.transition_delay_ms = 0;
        config.local.servers.push(LocalServerSettings {
            id: "s1".to_string(),
            name: "survival".to_string(),
            address: "survival.exaroton.me".to_string(),
            host: Some("127.0.0.1".to_string()),
            port: Some(25567),
            motd: String::new(),
            status: "online".to_string(),
        });
        config.proxy.servers.push(ProxyServerSettings {
            name: "smp".to_string(),
            address: "survival.exaroton.me".to_string(),
            restricted: true,
        });
        config
    }

    #[tokio::test]
    async fn test_application_creation() {
        let dir = tempfile::tempdir().unwrap();
        let args = CliArgs {
            config_path: dir.path().join("tether.toml"),
            log_level: Some("debug".to_string()),
            json_logs: true,
        };

        let app = Application::new(args.clone()).await.unwrap();
        assert!(args.config_path.exists());
        assert_eq!(app.config.logging.level, "debug");
        assert!(app.config.logging.json_format);
        assert_eq!(app.link.aliases().address_for("lobby"), Some("lobby.exaroton.me"));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.toml");
        tokio::fs::write(&path, "[logging]\nlevel = \"loud\"\n").await.unwrap();

        let args = CliArgs {
            config_path: path,
            log_level: None,
            json_logs: false,
        };
        let err = Application::new(args).await.err().unwrap();
        assert!(err.to_string().contains("Invalid log level"));
    }

    #[tokio::test]
    async fn test_startup_watches_and_shutdown_stops() {
        let mut config = test_config();
        config.auto_start.enabled = true;
        config.auto_stop.enabled = true;
        config.auto_stop.servers = vec!["smp".to_string()];
        let app = Application::with_config(config).unwrap();

        app.start().await;
        assert_eq!(app.link.registry().len(), 2);
        let smp = app.table.get("smp").expect("online backend is routed");
        assert!(smp.restricted);

        let lobby = app.link.registry().get("Tgkm8atPeLzTRaVj").unwrap();
        let online = timeout(Duration::from_secs(5), lobby.wait_for(ServerStatus::Online))
            .await
            .expect("lobby came online")
            .unwrap();
        assert_eq!(online.address, "lobby.exaroton.me");
        assert!(app.table.get("lobby").is_some());

        app.shutdown().await;
        assert!(app.link.registry().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_servers_when_shutdown_resolves() {
        let mut config = test_config();
        config.auto_stop.enabled = true;
        config.auto_stop.servers = vec!["smp".to_string()];
        let app = Application::with_config(config).unwrap();
        let link = app.link.clone();

        timeout(Duration::from_secs(5), app.run_until(async { Ok("SIGTERM") }))
            .await
            .expect("run returned after shutdown")
            .unwrap();
        assert!(link.registry().is_empty());

        let survival = timeout(Duration::from_secs(5), async {
            loop {
                let survival = link.resolve("survival", true).await.unwrap().unwrap();
                if survival.status == ServerStatus::Offline {
                    return survival;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("survival was stopped");
        assert_eq!(survival.address, "survival.exaroton.me");
    }

    #[tokio::test]
    async fn test_run_fails_when_signals_are_unavailable() {
        let app = Application::with_config(test_config()).unwrap();
        let link = app.link.clone();

        let err = app
            .run_until(async { Err(std::io::Error::other("no signal driver")) })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to listen for shutdown signals"));
        // startup ran, shutdown did not
        assert!(!link.registry().is_empty());
    }
}
