use thiserror::Error;

use crate::teleport::types::ActorId;

/// Errors that can arise while coordinating teleports or touching the location store.
#[derive(Debug, Error)]
pub enum TeleportError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around IO errors (directory creation, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The owner already holds `limit` homes and the name is new.
    #[error("home limit of {limit} reached")]
    LimitExceeded { limit: usize },

    /// A home write was attempted with a location that has no owner.
    #[error("location '{0}' has no owner")]
    NotAHome(String),

    /// The actor disconnected or died before a deferred teleport fired.
    #[error("actor {0} is no longer valid")]
    InvalidActor(ActorId),

    /// Returned when deserializing a record with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    /// Backend-agnostic durable store failure.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl TeleportError {
    /// True for faults raised by the durable store rather than by an expected condition.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            TeleportError::Sled(_)
                | TeleportError::Bincode(_)
                | TeleportError::Io(_)
                | TeleportError::SchemaMismatch { .. }
                | TeleportError::Storage(_)
        )
    }
}
