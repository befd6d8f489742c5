//! In-process fan-out transport.
//!
//! Every endpoint connected to the same [`LoopbackHub`] receives the messages
//! the others send, synchronously. Fault injection covers the failure modes
//! the sync core must tolerate: an endpoint whose sends fail and a network
//! that delivers every message twice.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::TransportError;
use crate::sync::broadcast::{BroadcastMessage, ReceiveHandler, Transport};
use crate::types::ReplicaId;

type SharedHandler = Arc<dyn Fn(BroadcastMessage) + Send + Sync>;

#[derive(Default)]
struct HubInner {
    handlers: BTreeMap<ReplicaId, Option<SharedHandler>>,
    offline: BTreeSet<ReplicaId>,
    duplicate_delivery: bool,
    sent: Vec<BroadcastMessage>,
}

#[derive(Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<RwLock<HubInner>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects an endpoint named `id`.
    pub fn connect(&self, id: impl Into<ReplicaId>) -> LoopbackTransport {
        let id = id.into();
        self.inner.write().handlers.entry(id.clone()).or_insert(None);
        LoopbackTransport {
            id,
            hub: self.clone(),
        }
    }

    /// Makes every send from `id` fail with [`TransportError::Disconnected`].
    pub fn set_offline(&self, id: &str, offline: bool) {
        let mut inner = self.inner.write();
        if offline {
            inner.offline.insert(id.to_string());
        } else {
            inner.offline.remove(id);
        }
    }

    /// Delivers every message twice, as an at-least-once network may.
    pub fn set_duplicate_delivery(&self, duplicate: bool) {
        self.inner.write().duplicate_delivery = duplicate;
    }

    /// Every message successfully handed to the hub.
    pub fn sent_messages(&self) -> Vec<BroadcastMessage> {
        self.inner.read().sent.clone()
    }

    fn deliver(&self, from: &str, message: &BroadcastMessage) -> Result<(), TransportError> {
        // Handlers run outside the lock: a handler may apply commands that
        // trigger another send.
        let (targets, copies) = {
            let mut inner = self.inner.write();
            if inner.offline.contains(from) {
                return Err(TransportError::Disconnected);
            }
            inner.sent.push(message.clone());
            let targets: Vec<SharedHandler> = inner
                .handlers
                .iter()
                .filter(|(id, _)| id.as_str() != from)
                .filter_map(|(_, handler)| handler.clone())
                .collect();
            let copies = if inner.duplicate_delivery { 2 } else { 1 };
            (targets, copies)
        };

        debug!("Loopback {} -> {} endpoint(s)", from, targets.len());
        for handler in targets {
            for _ in 0..copies {
                handler(message.clone());
            }
        }
        Ok(())
    }
}

/// One endpoint of a [`LoopbackHub`].
#[derive(Clone)]
pub struct LoopbackTransport {
    id: ReplicaId,
    hub: LoopbackHub,
}

impl LoopbackTransport {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Transport for LoopbackTransport {
    fn send_to_others(&self, message: &BroadcastMessage) -> Result<(), TransportError> {
        self.hub.deliver(&self.id, message)
    }

    fn on_receive(&self, handler: ReceiveHandler) {
        self.hub
            .inner
            .write()
            .handlers
            .insert(self.id.clone(), Some(Arc::from(handler)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::BTreeMap as Map;

    fn message(sender: &str) -> BroadcastMessage {
        BroadcastMessage::commands_added(sender, sender, Map::new())
    }

    fn counter(transport: &LoopbackTransport) -> Arc<Mutex<usize>> {
        let count = Arc::new(Mutex::new(0));
        let sink = count.clone();
        transport.on_receive(Box::new(move |_| *sink.lock() += 1));
        count
    }

    #[test]
    fn test_sends_to_others_only() {
        let hub = LoopbackHub::new();
        let a = hub.connect("a");
        let b = hub.connect("b");
        let c = hub.connect("c");
        let (count_a, count_b, count_c) = (counter(&a), counter(&b), counter(&c));

        a.send_to_others(&message("a")).unwrap();

        assert_eq!(*count_a.lock(), 0);
        assert_eq!(*count_b.lock(), 1);
        assert_eq!(*count_c.lock(), 1);
    }

    #[test]
    fn test_duplicate_delivery() {
        let hub = LoopbackHub::new();
        let a = hub.connect("a");
        let b = hub.connect("b");
        let count_b = counter(&b);

        hub.set_duplicate_delivery(true);
        a.send_to_others(&message("a")).unwrap();

        assert_eq!(*count_b.lock(), 2);
        assert_eq!(hub.sent_messages().len(), 1);
    }

    #[test]
    fn test_offline_endpoint_fails() {
        let hub = LoopbackHub::new();
        let a = hub.connect("a");
        hub.set_offline("a", true);

        assert!(matches!(
            a.send_to_others(&message("a")),
            Err(TransportError::Disconnected)
        ));
        assert!(hub.sent_messages().is_empty());
    }
}
