use thiserror::Error;

use crate::traits::{ConnectionId, EntityId, EntityKind};

/// Errors raised by the topology API and entity construction.
///
/// Nothing in here is produced while time advances: per-message shortfalls are
/// logged and absorbed by the entity that hit them.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    #[error("entity {0} cannot be connected to itself")]
    SelfConnection(EntityId),

    #[error("entities {0} and {1} are already connected")]
    AlreadyConnected(EntityId, EntityId),

    #[error("ip address {0} is already in use")]
    DuplicateIp(String),

    #[error("unknown entity kind: {0}")]
    UnknownKind(String),

    #[error("unknown load balancing algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("invalid {kind} configuration: {source}")]
    InvalidConfig {
        kind: EntityKind,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, SimError>;
