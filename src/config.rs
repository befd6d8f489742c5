//! Runtime configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Tunables of one replica's sync session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Largest number of commands a single broadcast may carry.
    pub max_commands_per_broadcast: usize,
    /// Cumulative number of commands this replica may broadcast per session.
    pub session_broadcast_ceiling: Option<usize>,
    /// Per-domain log length above which a prune is recommended.
    pub history_warning_threshold: usize,
    /// Remove orphaned commands after every durable write.
    pub auto_prune: bool,
    /// Capture a snapshot once this many commands were appended since the
    /// last one. Zero disables snapshots.
    pub snapshot_every: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            max_commands_per_broadcast: 500,
            session_broadcast_ceiling: Some(50_000),
            history_warning_threshold: 2_000,
            auto_prune: true,
            snapshot_every: 200,
        }
    }
}

/// Settings of the websocket relay binary, read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub addr: SocketAddr,
    /// JSON file backing the headless authority; `None` runs a plain relay.
    pub store_path: Option<PathBuf>,
    pub sync: SyncConfig,
}

pub const ADDR_ENV: &str = "SESSION_SYNC_ADDR";
pub const STORE_ENV: &str = "SESSION_SYNC_STORE";
pub const SYNC_CONFIG_ENV: &str = "SESSION_SYNC_CONFIG";

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            store_path: None,
            sync: SyncConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Reads `SESSION_SYNC_ADDR`, `SESSION_SYNC_STORE` and
    /// `SESSION_SYNC_CONFIG` (inline JSON for [`SyncConfig`]).
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = RelayConfig::default();
        if let Some(addr) = lookup(ADDR_ENV) {
            config.addr = addr
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid {}={:?}: {}", ADDR_ENV, addr, e))?;
        }
        config.store_path = lookup(STORE_ENV)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);
        if let Some(json) = lookup(SYNC_CONFIG_ENV) {
            config.sync = serde_json::from_str(&json)?;
        }
        Ok(config)
    }
}
