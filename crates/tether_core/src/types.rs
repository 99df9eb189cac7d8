//! # Core Type Definitions
//!
//! Value types shared by every component of the engine.
//!
//! - [`RemoteServer`] - snapshot of one remotely hosted game server
//! - [`ServerStatus`] - lifecycle status reported by the remote directory
//!
//! Snapshots are plain values. Every push event produces a new one and the
//! directory cache keeps the latest; nothing else should assume a clone it
//! holds is still current.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a remote server.
///
/// The remote directory reports statuses as integer codes. Codes this crate
/// does not know are kept as [`ServerStatus::Unknown`] so they can be logged,
/// but they never match any status set.
///
/// # Examples
///
/// ```rust
/// use tether_core::ServerStatus;
///
/// assert_eq!(ServerStatus::from(1), ServerStatus::Online);
/// assert!(ServerStatus::Crashed.is_any(ServerStatus::STARTABLE));
/// assert!(!ServerStatus::Unknown(42).is_any(ServerStatus::STARTABLE));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ServerStatus {
    Offline,
    Online,
    Starting,
    Stopping,
    Restarting,
    Saving,
    Loading,
    Crashed,
    Pending,
    Preparing,
    /// A code the remote directory sent that this crate does not recognize
    Unknown(i32),
}

impl ServerStatus {
    /// Statuses from which a server can be started.
    pub const STARTABLE: &'static [ServerStatus] = &[ServerStatus::Offline, ServerStatus::Crashed];

    /// Statuses of a server that is on its way to being online.
    pub const BOOTING: &'static [ServerStatus] = &[
        ServerStatus::Starting,
        ServerStatus::Loading,
        ServerStatus::Preparing,
        ServerStatus::Restarting,
    ];

    /// Statuses of a server that is on its way to being offline.
    pub const SHUTTING_DOWN: &'static [ServerStatus] = &[ServerStatus::Stopping, ServerStatus::Saving];

    /// Returns true if this status is one of `statuses`.
    ///
    /// [`ServerStatus::Unknown`] never matches, even if the slice happens to
    /// contain the same unknown code.
    pub fn is_any(&self, statuses: &[ServerStatus]) -> bool {
        !matches!(self, ServerStatus::Unknown(_)) && statuses.contains(self)
    }

    /// Numeric code used by the remote directory.
    pub fn code(&self) -> i32 {
        match self {
            ServerStatus::Offline => 0,
            ServerStatus::Online => 1,
            ServerStatus::Starting => 2,
            ServerStatus::Stopping => 3,
            ServerStatus::Restarting => 4,
            ServerStatus::Saving => 5,
            ServerStatus::Loading => 6,
            ServerStatus::Crashed => 7,
            ServerStatus::Pending => 8,
            ServerStatus::Preparing => 10,
            ServerStatus::Unknown(code) => *code,
        }
    }
}

impl From<i32> for ServerStatus {
    fn from(code: i32) -> Self {
        match code {
            0 => ServerStatus::Offline,
            1 => ServerStatus::Online,
            2 => ServerStatus::Starting,
            3 => ServerStatus::Stopping,
            4 => ServerStatus::Restarting,
            5 => ServerStatus::Saving,
            6 => ServerStatus::Loading,
            7 => ServerStatus::Crashed,
            8 => ServerStatus::Pending,
            10 => ServerStatus::Preparing,
            other => ServerStatus::Unknown(other),
        }
    }
}

impl From<ServerStatus> for i32 {
    fn from(status: ServerStatus) -> Self {
        status.code()
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerStatus::Offline => f.write_str("offline"),
            ServerStatus::Online => f.write_str("online"),
            ServerStatus::Starting => f.write_str("starting"),
            ServerStatus::Stopping => f.write_str("stopping"),
            ServerStatus::Restarting => f.write_str("restarting"),
            ServerStatus::Saving => f.write_str("saving"),
            ServerStatus::Loading => f.write_str("loading"),
            ServerStatus::Crashed => f.write_str("crashed"),
            ServerStatus::Pending => f.write_str("pending"),
            ServerStatus::Preparing => f.write_str("preparing"),
            ServerStatus::Unknown(code) => write!(f, "unknown({code})"),
        }
    }
}

impl FromStr for ServerStatus {
    type Err = String;

    /// Parses the lowercase names produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s.to_ascii_lowercase().as_str() {
            "offline" => ServerStatus::Offline,
            "online" => ServerStatus::Online,
            "starting" => ServerStatus::Starting,
            "stopping" => ServerStatus::Stopping,
            "restarting" => ServerStatus::Restarting,
            "saving" => ServerStatus::Saving,
            "loading" => ServerStatus::Loading,
            "crashed" => ServerStatus::Crashed,
            "pending" => ServerStatus::Pending,
            "preparing" => ServerStatus::Preparing,
            other => return Err(format!("Unknown server status: {other}")),
        };
        Ok(status)
    }
}

/// Snapshot of a remote game server as reported by the remote directory.
///
/// `host` and `port` are only meaningful while the status implies the server
/// is reachable; the directory reports them as absent otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteServer {
    /// Stable opaque identifier, the primary key
    pub id: String,
    /// Display name
    pub name: String,
    /// Routable hostname, e.g. `lobby.exaroton.me`
    pub address: String,
    /// Network endpoint host, present while reachable
    #[serde(default)]
    pub host: Option<String>,
    /// Network endpoint port, present while reachable
    #[serde(default)]
    pub port: Option<u16>,
    /// Message of the day shown in server lists
    #[serde(default)]
    pub motd: String,
    /// Current lifecycle status
    pub status: ServerStatus,
}

impl RemoteServer {
    /// Returns true if the server's status is one of `statuses`.
    pub fn has_status(&self, statuses: &[ServerStatus]) -> bool {
        self.status.is_any(statuses)
    }

    pub fn is_online(&self) -> bool {
        self.status == ServerStatus::Online
    }

    /// The network endpoint, if the directory reported one.
    pub fn endpoint(&self) -> Option<(&str, u16)> {
        match (&self.host, self.port) {
            (Some(host), Some(port)) => Some((host.as_str(), port)),
            _ => None,
        }
    }

    /// Returns a copy of this snapshot with a different status.
    pub fn with_status(&self, status: ServerStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

impl fmt::Display for RemoteServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.address, self.status)
    }
}
