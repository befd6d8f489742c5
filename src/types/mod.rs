//! Type definitions shared by every module of the sync core.
//!
//! Identifiers, the domain partition and the replica-local timestamp clock
//! live here so the store, the log and the sync engine agree on them.

pub mod domain;
pub mod ids;
pub mod timestamp;

pub use domain::Domain;
pub use ids::{CommandId, EntityId, ReplicaId, new_command_id, new_entity_id};
pub use timestamp::{TimestampClock, now_millis};
