//! Route handlers of the relay.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, ws::WebSocketUpgrade},
    response::{Json, Response},
    routing::get,
};
use serde::Serialize;
use tracing::error;

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::persistence::SettingsStore;
use crate::server::websocket::{PeerTable, RelayTransport, handle_websocket_connection};
use crate::session::{SessionOptions, SharedSession, SyncSession};
use crate::sync::BroadcastMessage;
use crate::types::Domain;

/// Replica id of the relay's headless authority.
pub const AUTHORITY_ID: &str = "relay-authority";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub peers: usize,
    /// Commands held by the headless authority, when one runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commands: Option<usize>,
}

pub struct RelayState {
    peers: Arc<PeerTable>,
    authority: Option<SharedSession>,
}

/// Shared application state
pub type AppState = Arc<RelayState>;

impl RelayState {
    /// A plain fan-out relay.
    pub fn relay_only() -> Self {
        RelayState {
            peers: Arc::new(PeerTable::new()),
            authority: None,
        }
    }

    /// A relay that also runs a privileged, headless replica which persists
    /// every relayed command and hands the full history to new peers.
    pub fn with_authority(
        settings: Arc<dyn SettingsStore>,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        let peers = Arc::new(PeerTable::new());
        let transport = Arc::new(RelayTransport::new(peers.clone()));
        let options = SessionOptions::new(AUTHORITY_ID)
            .label("Relay")
            .privileged(true)
            .config(config);
        let (session, _) = SyncSession::start(transport, settings, options)?;
        Ok(RelayState {
            peers,
            authority: Some(session.into_shared()),
        })
    }

    pub fn peers(&self) -> &Arc<PeerTable> {
        &self.peers
    }

    pub fn authority(&self) -> Option<&SharedSession> {
        self.authority.as_ref()
    }

    /// The authority's whole log as one message, if there is anything to send.
    pub fn history_message(&self) -> Option<String> {
        let session = self.authority.as_ref()?.lock();
        let history = session.replica().history();
        if history.is_empty() {
            return None;
        }
        let commands: BTreeMap<_, _> = Domain::ALL
            .into_iter()
            .map(|domain| (domain, history.log(domain).to_vec()))
            .filter(|(_, log)| !log.is_empty())
            .collect();
        let message = BroadcastMessage::commands_added(AUTHORITY_ID, "Relay", commands);
        match message.to_json() {
            Ok(text) => Some(text),
            Err(e) => {
                error!("Failed to encode history for new peer: {}", e);
                None
            }
        }
    }
}

/// Basic health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let commands = match state.authority().cloned() {
        Some(session) => {
            tokio::task::spawn_blocking(move || session.lock().replica().history().total_len())
                .await
                .ok()
        }
        None => None,
    };
    Json(HealthResponse {
        status: "ok".to_string(),
        peers: state.peers().len(),
        commands,
    })
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_websocket_connection(socket, state))
}

/// Creates and configures the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .with_state(state)
}
