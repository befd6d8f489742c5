//! Broadcast orchestration over an external fan-out transport.
//!
//! The transport offers fire-and-forget `send_to_others` with at-least-once,
//! best-effort-ordered delivery. The broadcaster adds no retries: a failed
//! send leaves the outbox offsets where they were, so the same window goes
//! out with the next broadcast.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::command::Command;
use crate::error::{SyncError, TransportError};
use crate::sync::breaker::CircuitBreaker;
use crate::sync::replica::{Replica, ReplayReport};
use crate::types::{Domain, ReplicaId, now_millis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    CommandsAdded,
}

/// The message peers exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub sender_id: ReplicaId,
    pub sender_label: String,
    pub command_count: usize,
    pub commands: BTreeMap<Domain, Vec<Command>>,
    pub timestamp: i64,
}

impl BroadcastMessage {
    pub fn commands_added(
        sender_id: impl Into<ReplicaId>,
        sender_label: impl Into<String>,
        commands: BTreeMap<Domain, Vec<Command>>,
    ) -> Self {
        let command_count = commands.values().map(Vec::len).sum();
        BroadcastMessage {
            kind: MessageKind::CommandsAdded,
            sender_id: sender_id.into(),
            sender_label: sender_label.into(),
            command_count,
            commands,
            timestamp: now_millis(),
        }
    }

    pub fn to_json(&self) -> Result<String, TransportError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, TransportError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Callback invoked for every message delivered to this replica.
pub type ReceiveHandler = Box<dyn Fn(BroadcastMessage) + Send + Sync>;

/// The fan-out primitive consumed by the sync core.
pub trait Transport: Send + Sync {
    /// Delivers `message` to every other connected replica. Fire-and-forget.
    fn send_to_others(&self, message: &BroadcastMessage) -> Result<(), TransportError>;

    /// Registers the handler for incoming messages, replacing any previous one.
    fn on_receive(&self, handler: ReceiveHandler);
}

/// Packages new local commands into messages and unpacks received ones.
pub struct Broadcaster {
    transport: Arc<dyn Transport>,
    sender_id: ReplicaId,
    sender_label: String,
    breaker: CircuitBreaker,
}

impl Broadcaster {
    pub fn new(
        transport: Arc<dyn Transport>,
        sender_id: impl Into<ReplicaId>,
        sender_label: impl Into<String>,
        breaker: CircuitBreaker,
    ) -> Self {
        Broadcaster {
            transport,
            sender_id: sender_id.into(),
            sender_label: sender_label.into(),
            breaker,
        }
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn reset_breaker(&mut self) {
        self.breaker.reset();
    }

    /// Sends every command generated since the last successful send, split
    /// into messages of at most the breaker's per-broadcast size.
    /// Returns how many commands went out.
    pub fn broadcast_pending(&mut self, replica: &mut Replica) -> Result<usize, SyncError> {
        let total = replica.pending_len();
        if total == 0 {
            return Ok(0);
        }
        self.breaker.check(total)?;

        let mut sent = 0;
        loop {
            let batch = replica.pending_chunk(self.breaker.max_per_broadcast());
            if batch.is_empty() {
                break;
            }
            let count = batch.len();
            let message = BroadcastMessage::commands_added(
                &*self.sender_id,
                &*self.sender_label,
                batch.commands,
            );
            if let Err(e) = self.transport.send_to_others(&message) {
                error!(
                    "Broadcast of {} command(s) from {} failed after {} sent: {}",
                    count, self.sender_id, sent, e
                );
                return Err(e.into());
            }
            replica.mark_sent(&batch.upto);
            self.breaker.record(count);
            sent += count;
        }
        debug!("Broadcast {} command(s) from {}", sent, self.sender_id);
        Ok(sent)
    }

    /// Feeds a received message into the replica's dedup/apply engine.
    pub fn receive(&self, replica: &mut Replica, message: &BroadcastMessage) -> ReplayReport {
        if message.sender_id == self.sender_id {
            debug!("Ignoring echo of own broadcast");
            return ReplayReport::default();
        }
        let actual: usize = message.commands.values().map(Vec::len).sum();
        if actual != message.command_count {
            warn!(
                "Message from {} announces {} command(s) but carries {}",
                message.sender_label, message.command_count, actual
            );
        }
        let report = replica.apply_remote(&message.commands);
        debug!(
            "Received {} command(s) from {}: {} applied, {} duplicate, {} skipped",
            actual,
            message.sender_label,
            report.applied,
            report.duplicates,
            report.skipped.len()
        );
        report
    }
}
