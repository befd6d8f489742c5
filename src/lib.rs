//! # Session sync
//!
//! Multi-client state synchronization for a tabletop session tool. Every
//! mutation is an immutable, uniquely identified, timestamped command; each
//! client keeps a full replica and converges by replaying the same commands.
//!
//! ## Features
//!
//! - **Command log**: per-domain append-only logs merged by timestamp
//! - **Exactly-once apply**: a seen set absorbs at-least-once delivery
//! - **Exactly-once send**: per-domain outbox offsets, guarded by a circuit breaker
//! - **Clock rules**: harm cap, addiction singleton, consumable freezing
//! - **Single-writer persistence**: full history, snapshots and orphan pruning
//!
//! ## Example
//!
//! ```rust
//! use session_sync::command::CrewCommand;
//! use session_sync::sync::Replica;
//!
//! let mut replica = Replica::new(None);
//! replica
//!     .execute(CrewCommand::Create { id: "crew-1".into(), name: "Bravos".into() })
//!     .unwrap();
//! assert_eq!(replica.state().crews["crew-1"].coin, 0);
//! ```

pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod history;
pub mod model;
pub mod persistence;
pub mod server;
pub mod session;
pub mod store;
pub mod sync;
pub mod types;

pub use clock::{Clock, ClockRequest, ClockType};
pub use command::{CharacterCommand, ClockCommand, Command, CommandBody, CrewCommand};
pub use config::{RelayConfig, SyncConfig};
pub use error::{SyncError, SyncResult, ValidationError};
pub use history::CommandHistory;
pub use session::{CommitReport, RefreshNotifier, SessionOptions, SharedSession, SyncSession};
pub use store::{ApplyMode, SessionState};
pub use sync::{LoopbackHub, Replica};
pub use types::{CommandId, Domain, EntityId};
