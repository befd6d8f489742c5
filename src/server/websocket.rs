//! Websocket peers of the relay.
//!
//! Every text frame a peer sends must be a [`BroadcastMessage`]; it is fanned
//! out unchanged to every other connected peer and handed to the headless
//! authority, if one runs. Malformed frames are dropped with a warning.
//!
//! The authority locks its session and writes storage synchronously, so it
//! consumes relayed messages on its own thread, fed through a channel in
//! arrival order. Reader tasks never wait on it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use axum::extract::ws::{Message, WebSocket};
use crossbeam_skiplist::SkipMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::TransportError;
use crate::server::routes::AppState;
use crate::sync::{BroadcastMessage, ReceiveHandler, Transport};

pub type PeerId = u64;

/// Connected peers, each reachable through an unbounded outbound queue.
#[derive(Default)]
pub struct PeerTable {
    peers: SkipMap<PeerId, mpsc::UnboundedSender<String>>,
    next_id: AtomicU64,
    local: RwLock<Option<mpsc::UnboundedSender<BroadcastMessage>>>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self) -> (PeerId, mpsc::UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.insert(id, tx);
        (id, rx)
    }

    pub fn unregister(&self, id: PeerId) {
        self.peers.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Queues `text` for every peer except `from`. Returns how many peers it
    /// was queued for.
    pub fn forward(&self, from: Option<PeerId>, text: &str) -> usize {
        let mut delivered = 0;
        for entry in self.peers.iter() {
            if Some(*entry.key()) == from {
                continue;
            }
            if entry.value().send(text.to_string()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Queues `message` for the local authority without waiting for it.
    fn deliver_local(&self, message: BroadcastMessage) {
        if let Some(local) = self.local.read().as_ref() {
            if local.send(message).is_err() {
                warn!("Authority hand-off has stopped, message not persisted");
            }
        }
    }
}

/// The transport the relay's own authority session broadcasts through.
pub struct RelayTransport {
    table: Arc<PeerTable>,
}

impl RelayTransport {
    pub fn new(table: Arc<PeerTable>) -> Self {
        RelayTransport { table }
    }
}

impl Transport for RelayTransport {
    fn send_to_others(&self, message: &BroadcastMessage) -> Result<(), TransportError> {
        let text = message.to_json()?;
        self.table.forward(None, &text);
        Ok(())
    }

    fn on_receive(&self, handler: ReceiveHandler) {
        let (tx, mut rx) = mpsc::unbounded_channel::<BroadcastMessage>();
        let spawned = thread::Builder::new()
            .name("relay-authority".into())
            .spawn(move || {
                while let Some(message) = rx.blocking_recv() {
                    handler(message);
                }
                debug!("Authority hand-off closed");
            });
        match spawned {
            // Replacing the sender closes the previous handler's queue.
            Ok(_) => *self.table.local.write() = Some(tx),
            Err(e) => error!("Failed to start the authority hand-off thread: {}", e),
        }
    }
}

/// One websocket peer for the lifetime of its connection.
pub struct PeerSession {
    socket: WebSocket,
    state: AppState,
}

impl PeerSession {
    pub fn new(socket: WebSocket, state: AppState) -> Self {
        Self { socket, state }
    }

    pub async fn handle(self) {
        let PeerSession { socket, state } = self;
        let table = state.peers().clone();
        let (peer_id, mut outbound) = table.register();
        info!("Peer {} connected ({} online)", peer_id, table.len());

        let (mut sink, mut stream) = socket.split();

        // Registered before the history is captured, so nothing falls in
        // between; overlap is removed by the receivers' dedup.
        let history = {
            let state = state.clone();
            tokio::task::spawn_blocking(move || state.history_message()).await
        };
        match history {
            Ok(Some(history)) => {
                if let Err(e) = sink.send(Message::Text(history)).await {
                    error!("Failed to send history to peer {}: {}", peer_id, e);
                    table.unregister(peer_id);
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => error!("Capturing history for peer {} failed: {}", peer_id, e),
        }

        let writer = tokio::spawn(async move {
            while let Some(text) = outbound.recv().await {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => relay_frame(&table, peer_id, &text),
                Ok(Message::Close(_)) => {
                    info!("Peer {} closed the connection", peer_id);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Websocket error for peer {}: {}", peer_id, e);
                    break;
                }
            }
        }

        table.unregister(peer_id);
        writer.abort();
        info!("Peer {} disconnected ({} online)", peer_id, table.len());
    }
}

fn relay_frame(table: &PeerTable, peer_id: PeerId, text: &str) {
    match BroadcastMessage::from_json(text) {
        Ok(message) => {
            let delivered = table.forward(Some(peer_id), text);
            debug!(
                "Relayed {} command(s) from {} to {} peer(s)",
                message.command_count, message.sender_label, delivered
            );
            table.deliver_local(message);
        }
        Err(e) => warn!("Dropping malformed frame from peer {}: {}", peer_id, e),
    }
}

/// Runs a new websocket peer to completion.
pub async fn handle_websocket_connection(socket: WebSocket, state: AppState) {
    PeerSession::new(socket, state).handle().await;
}
