//! Error types for the controller server
//!
//! Only [`ServerError`] ever reaches the caller of [`Server::bind`](crate::Server::bind).
//! Everything else is connection-scoped: it is logged, the affected
//! connection may be torn down, and the listener keeps running.

use crate::transport::ConnectionId;
use protocol::FrameError;
use std::io;

/// Failures of the listening socket or of a single connection
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("receive failed on connection {id}: {source}")]
    Receive { id: ConnectionId, source: io::Error },

    #[error("send failed on connection {id}: {source}")]
    Send { id: ConnectionId, source: io::Error },

    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    #[error("framing error on connection {id}: {source}")]
    Frame { id: ConnectionId, source: FrameError },
}

/// Slot registry outcomes that are not a successful assignment
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("all player slots are occupied")]
    Full,

    #[error("player {0} not found")]
    NotFound(usize),

    #[error("server is shutting down")]
    ShuttingDown,

    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Fatal errors surfaced while starting the server
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
