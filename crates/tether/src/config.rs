//! Configuration management for the tether daemon.
//!
//! Loads the TOML configuration file, creating one with defaults when it is
//! missing, and turns it into the values the link engine is built from.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tether_core::{AliasTable, RemoteServer, ServerStatus};
use tokio::time::Duration;
use tracing::info;

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_alias_domain() -> String {
    "exaroton.me".to_string()
}

fn default_transition_delay_ms() -> u64 {
    2000
}

fn default_status() -> String {
    "offline".to_string()
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub directory: DirectorySettings,
    #[serde(default)]
    pub proxy: ProxySettings,
    #[serde(default)]
    pub watch: WatchSettings,
    #[serde(default)]
    pub auto_start: AutoSettings,
    #[serde(default)]
    pub auto_stop: AutoSettings,
    #[serde(default)]
    pub local: LocalSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Remote directory settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorySettings {
    /// How long a server listing is served from cache
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Backends whose address lies under this domain become aliases
    #[serde(default = "default_alias_domain")]
    pub alias_domain: String,
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            alias_domain: default_alias_domain(),
        }
    }
}

/// The proxy's configured backend list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxySettings {
    #[serde(default)]
    pub servers: Vec<ProxyServerSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyServerSettings {
    /// Routing name, e.g. `lobby`
    pub name: String,
    /// Backend address, e.g. `lobby.exaroton.me:25565`
    pub address: String,
    /// Hidden from the server list while still connectable
    #[serde(default)]
    pub restricted: bool,
}

/// Whether to watch every aliased backend at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchSettings {
    #[serde(default)]
    pub enabled: bool,
}

/// Servers to start when the daemon starts, or stop when it shuts down.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Queries resolved like any other server reference
    #[serde(default)]
    pub servers: Vec<String>,
}

/// The in-process directory the daemon runs against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSettings {
    /// Pause between two lifecycle steps of a server
    #[serde(default = "default_transition_delay_ms")]
    pub transition_delay_ms: u64,
    #[serde(default)]
    pub servers: Vec<LocalServerSettings>,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            transition_delay_ms: default_transition_delay_ms(),
            servers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalServerSettings {
    pub id: String,
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub motd: String,
    /// Initial status by name, e.g. `offline`
    #[serde(default = "default_status")]
    pub status: String,
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            directory: DirectorySettings::default(),
            proxy: ProxySettings {
                servers: vec![ProxyServerSettings {
                    name: "lobby".to_string(),
                    address: "lobby.exaroton.me:25565".to_string(),
                    restricted: false,
                }],
            },
            watch: WatchSettings { enabled: true },
            auto_start: AutoSettings {
                enabled: false,
                servers: vec!["lobby".to_string()],
            },
            auto_stop: AutoSettings {
                enabled: false,
                servers: vec!["lobby".to_string()],
            },
            local: LocalSettings {
                transition_delay_ms: default_transition_delay_ms(),
                servers: vec![LocalServerSettings {
                    id: "Tgkm8atPeLzTRaVj".to_string(),
                    name: "lobby".to_string(),
                    address: "lobby.exaroton.me".to_string(),
                    host: Some("127.0.0.1".to_string()),
                    port: Some(25566),
                    motd: "A tether lobby".to_string(),
                    status: default_status(),
                }],
            },
            logging: LoggingSettings::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration to `path`
    /// and returns it.
    pub async fn load_from_file(path: &PathBuf) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// Returns an error string describing the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.directory.cache_ttl_secs == 0 {
            return Err("Cache TTL must be greater than zero".to_string());
        }
        if self.directory.alias_domain.is_empty() {
            return Err("Alias domain cannot be empty".to_string());
        }

        let mut names = HashSet::new();
        for server in &self.proxy.servers {
            if server.name.is_empty() {
                return Err(format!("Proxy server with address {} has no name", server.address));
            }
            if !names.insert(server.name.as_str()) {
                return Err(format!("Duplicate proxy server name: {}", server.name));
            }
        }

        let mut ids = HashSet::new();
        for server in &self.local.servers {
            if server.id.is_empty() {
                return Err(format!("Local server {} has no id", server.name));
            }
            if !ids.insert(server.id.as_str()) {
                return Err(format!("Duplicate local server id: {}", server.id));
            }
            server.status.parse::<ServerStatus>()?;
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.directory.cache_ttl_secs)
    }

    pub fn transition_delay(&self) -> Duration {
        Duration::from_millis(self.local.transition_delay_ms)
    }

    /// Aliases for every proxy backend under the alias domain.
    pub fn alias_table(&self) -> AliasTable {
        AliasTable::from_proxy_servers(
            self.proxy
                .servers
                .iter()
                .map(|server| (server.name.clone(), server.address.as_str())),
            &self.directory.alias_domain,
        )
    }

    /// Whether the proxy backend called `name` is restricted.
    pub fn is_restricted(&self, name: &str) -> bool {
        self.proxy
            .servers
            .iter()
            .any(|server| server.name == name && server.restricted)
    }

    /// Seed list for the in-process directory.
    pub fn local_servers(&self) -> Result<Vec<RemoteServer>, String> {
        self.local
            .servers
            .iter()
            .map(|server| -> Result<RemoteServer, String> {
                Ok(RemoteServer {
                    id: server.id.clone(),
                    name: server.name.clone(),
                    address: server.address.clone(),
                    host: server.host.clone(),
                    port: server.port,
                    motd: server.motd.clone(),
                    status: server.status.parse()?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use tokio::fs;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_ttl(), Duration::from_secs(60));
        assert_eq!(config.directory.alias_domain, "exaroton.me");
    }

    #[tokio::test]
    async fn test_load_from_nonexistent_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tether.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.proxy.servers[0].name, "lobby");
        assert!(path.exists());

        // the written file loads back to the same settings
        let reloaded = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(reloaded.local.servers.len(), 1);
        assert_eq!(reloaded.local.servers[0].port, Some(25566));
    }

    #[tokio::test]
    async fn test_load_from_existing_file() {
        let toml_content = r#"
[directory]
cache_ttl_secs = 30

[[proxy.servers]]
name = "hub"
address = "hub.exaroton.me:25565"
restricted = true

[[proxy.servers]]
name = "local"
address = "127.0.0.1:25570"

[watch]
enabled = true

[auto_start]
enabled = true
servers = ["hub"]

[local]
transition_delay_ms = 10

[[local.servers]]
id = "h1"
name = "Hub"
address = "hub.exaroton.me"
status = "online"
host = "127.0.0.1"
port = 25571

[logging]
level = "debug"
"#;

        let temp_file = NamedTempFile::new().unwrap();
        fs::write(temp_file.path(), toml_content).await.unwrap();

        let config = AppConfig::load_from_file(&temp_file.path().to_path_buf()).await.unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_ttl(), Duration::from_secs(30));
        assert_eq!(config.directory.alias_domain, "exaroton.me");
        assert!(config.watch.enabled);
        assert!(config.auto_start.enabled);
        assert!(!config.auto_stop.enabled);
        assert_eq!(config.transition_delay(), Duration::from_millis(10));
        assert_eq!(config.logging.level, "debug");
        assert!(!config.logging.json_format);

        let aliases = config.alias_table();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases.address_for("hub"), Some("hub.exaroton.me"));
        assert!(config.is_restricted("hub"));
        assert!(!config.is_restricted("local"));

        let servers = config.local_servers().unwrap();
        assert_eq!(servers[0].status, ServerStatus::Online);
        assert_eq!(servers[0].endpoint(), Some(("127.0.0.1", 25571)));
    }

    #[test]
    fn test_validation_rejects_zero_ttl() {
        let mut config = AppConfig::default();
        config.directory.cache_ttl_secs = 0;
        assert!(config.validate().unwrap_err().contains("Cache TTL"));
    }

    #[test]
    fn test_validation_rejects_duplicate_proxy_names() {
        let mut config = AppConfig::default();
        config.proxy.servers.push(config.proxy.servers[0].clone());
        assert!(config.validate().unwrap_err().contains("Duplicate proxy server name"));
    }

    #[test]
    fn test_validation_rejects_unknown_status() {
        let mut config = AppConfig::default();
        config.local.servers[0].status = "sleeping".to_string();
        assert!(config.validate().unwrap_err().contains("Unknown server status"));
        assert!(config.local_servers().is_err());
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = AppConfig::default();
        config.logging.level = "invalid_level".to_string();

        let result = config.validate();
        assert!(result.unwrap_err().contains("Invalid log level"));
    }

    #[test]
    fn test_validation_valid_log_levels() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            let mut config = AppConfig::default();
            config.logging.level = level.to_string();
            assert!(config.validate().is_ok(), "Level '{}' should be valid", level);
        }
    }
}
