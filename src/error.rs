//! Error taxonomy for the sync core.
//!
//! Only first-time command application produces [`ValidationError`]s. Replay
//! failures are recorded in a [`ReplayReport`](crate::sync::ReplayReport)
//! instead of propagating, and transport/persistence failures are logged by the
//! session and never undo local state.

use thiserror::Error;

use crate::clock::ClockType;
use crate::types::{Domain, EntityId};

pub type SyncResult<T> = Result<T, SyncError>;

/// A command was rejected on first-time application.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("segment amount must be positive, got {amount}")]
    InvalidSegmentAmount { amount: u32 },

    #[error("segments {segments} out of range 0..={max_segments}")]
    SegmentsOutOfRange { segments: u32, max_segments: u32 },

    #[error("clock {0} not found")]
    UnknownClock(EntityId),

    #[error("{domain} entity {id} not found")]
    UnknownEntity { domain: Domain, id: EntityId },

    #[error("{domain} entity {id} already exists")]
    DuplicateEntity { domain: Domain, id: EntityId },

    #[error("{clock_type} clock cannot have {size} segments")]
    InvalidClockSize { clock_type: ClockType, size: u32 },

    #[error("entity {entity_id} already has a {clock_type} clock")]
    DuplicateSingleton {
        entity_id: EntityId,
        clock_type: ClockType,
    },

    #[error("crew {id} has {available} coin, cannot spend {requested}")]
    InsufficientResource {
        id: EntityId,
        available: u32,
        requested: u32,
    },

    #[error("name must not be empty")]
    EmptyName,
}

/// The fan-out primitive failed to send a message.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport disconnected")]
    Disconnected,

    #[error("send failed: {0}")]
    Send(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// The durable settings store could not be read or written.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("settings key {key} could not be read: {reason}")]
    Read { key: String, reason: String },

    #[error("settings key {key} could not be written: {reason}")]
    Write { key: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl PersistenceError {
    pub fn write(key: impl Into<String>, reason: impl ToString) -> Self {
        PersistenceError::Write {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    pub fn read(key: impl Into<String>, reason: impl ToString) -> Self {
        PersistenceError::Read {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Umbrella error surfaced by the session API.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("persistence failure: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("broadcast refused: {pending} pending commands exceed limit {limit}")]
    CircuitOpen { pending: usize, limit: usize },

    #[error("malformed command: {0}")]
    MalformedCommand(String),

    #[error("only the persistence authority may rewrite history")]
    NotAuthority,
}
