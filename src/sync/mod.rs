//! Replication: deduplicated apply, send-side offsets, broadcast.
//!
//! Receiving and sending have independent exactly-once guarantees. The seen
//! set makes execution at-most-once per command id on this replica despite
//! at-least-once delivery; the outbox offsets make each locally generated
//! command leave this replica in exactly one successful broadcast.

pub mod breaker;
pub mod broadcast;
pub mod dedup;
pub mod loopback;
pub mod replica;

pub use breaker::CircuitBreaker;
pub use broadcast::{BroadcastMessage, Broadcaster, MessageKind, ReceiveHandler, Transport};
pub use dedup::{Outbox, PendingBatch, SeenSet};
pub use loopback::{LoopbackHub, LoopbackTransport};
pub use replica::{LocalChange, Replica, ReplayReport, SkippedCommand};
