//! Session error taxonomy.

use lattice_wire::WireError;
use lattice_world::{EntityId, RemovalError};
use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::TransportError;

/// How a condition affects the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The session cannot continue; the caller must tear down.
    Fatal,
    /// The session continues on stale state until the condition resolves.
    Advisory,
    /// A single message was skipped; the rest of the session is unaffected.
    Local,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("connection lost: all connection attempts exhausted")]
    ConnectionLost,

    #[error("malformed snapshot entry for `{id}`: {source}")]
    MalformedSnapshotEntry {
        id: EntityId,
        #[source]
        source: WireError,
    },

    #[error(transparent)]
    OutOfRangeRemoval(#[from] RemovalError),

    #[error("not connected")]
    NotConnected,

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SyncError {
    pub fn severity(&self) -> Severity {
        match self {
            Self::ConnectionLost | Self::Config(_) => Severity::Fatal,
            Self::NotConnected | Self::Transport(_) => Severity::Advisory,
            Self::MalformedSnapshotEntry { .. } | Self::OutOfRangeRemoval(_) => Severity::Local,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}
