//! # Tether Core
//!
//! Keeps a game network proxy's routing table in step with remotely hosted,
//! on-demand game servers.
//!
//! ## Core Features
//!
//! - **Directory Cache**: one time-limited copy of the remote server listing,
//!   patched in place from push events
//! - **Query Resolution**: names, addresses, ids and proxy aliases resolve to
//!   one server with a deterministic tie-break
//! - **Subscription Registry**: at most one push subscription per server,
//!   shared by every caller that watches it
//! - **Route Reconciliation**: servers join the proxy when they come online
//!   and leave it when they go offline, never overwriting an existing route
//! - **Status Waiters**: futures that resolve when a server reaches a status
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tether_core::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let directory = Arc::new(LocalDirectory::new(vec![RemoteServer {
//!         id: "Tgkm8atPeLzTRaVj".to_string(),
//!         name: "lobby".to_string(),
//!         address: "lobby.exaroton.me".to_string(),
//!         host: Some("127.0.0.1".to_string()),
//!         port: Some(25565),
//!         motd: String::new(),
//!         status: ServerStatus::Offline,
//!     }]));
//!     let table = Arc::new(MemoryProxyTable::new());
//!     let link = ProxyLink::new(directory, table.clone(), AliasTable::new(), Duration::from_secs(60));
//!
//!     let server = link.resolve("lobby", false).await?.expect("lobby exists");
//!     let name = link.ensure_online(&server, Some(Arc::new(LogObserver::new()))).await?;
//!     assert!(table.get(&name).is_some());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod directory;
pub mod error;
pub mod link;
pub mod local;
pub mod observer;
pub mod proxy;
pub mod registry;
pub mod resolver;
pub mod types;

pub use cache::{DirectoryCache, DEFAULT_CACHE_TTL};
pub use directory::{PushHandle, RemoteDirectory, StatusListener};
pub use error::{DirectoryError, LinkError, Result};
pub use link::{AddOutcome, ProxyLink};
pub use local::LocalDirectory;
pub use observer::{ChangeKind, LogObserver, StatusChange, StatusObserver};
pub use proxy::{MemoryProxyTable, ProxyReconciler, ProxyTable, Reconciliation, RouteEntry};
pub use registry::{Echo, EchoUntil, StatusWaiter, Subscription, SubscriptionRegistry, WatchOptions};
pub use resolver::{AliasTable, QueryResolver};
pub use types::{RemoteServer, ServerStatus};
