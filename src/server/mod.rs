//! Websocket relay: the fan-out transport for replicas that live in separate
//! processes, optionally with a headless persistence authority.

pub mod routes;
pub mod websocket;

pub use routes::{AUTHORITY_ID, AppState, HealthResponse, RelayState, create_router};
pub use websocket::{PeerId, PeerTable, RelayTransport};
