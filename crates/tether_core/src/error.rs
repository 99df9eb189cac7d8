//! Error types for the engine and for the remote directory boundary.

/// Errors reported by a [`RemoteDirectory`](crate::RemoteDirectory) implementation.
///
/// The engine never retries these; they are handed to whoever made the call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// The request reached the directory but failed
    #[error("Request failed: {0}")]
    Request(String),
    /// The directory rejected our credentials
    #[error("Unauthorized")]
    Unauthorized,
    /// Too many requests
    #[error("Rate limited")]
    RateLimited,
    /// No server with this id exists in the directory
    #[error("Unknown server: {0}")]
    UnknownServer(String),
    /// Opening or closing a push subscription failed
    #[error("Subscription error: {0}")]
    Subscription(String),
}

/// Errors returned by engine operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    /// The remote directory call failed
    #[error("Remote directory error: {0}")]
    Directory(#[from] DirectoryError),
    /// An argument was rejected before any state was touched
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The subscription a waiter belonged to was removed before its status was reached
    #[error("Stopped watching {0} before the awaited status was reached")]
    WatchClosed(String),
    /// The server is in a status from which it cannot be brought online
    #[error("Server {name} cannot be started while {status}")]
    NotStartable {
        name: String,
        status: crate::ServerStatus,
    },
}

pub type Result<T> = std::result::Result<T, LinkError>;
