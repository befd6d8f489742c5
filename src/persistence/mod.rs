//! Durable storage of the merged log, owned by a single privileged replica.
//!
//! Storage layout under the settings store:
//!
//! ```text
//! commandHistory: { <domain>: [Command, ...], ... }
//! stateSnapshot:  { timestamp, domains: { <domain>: <projection> }, commandCounts } | null
//! ```

pub mod authority;
pub mod prune;
pub mod settings;
pub mod snapshot;

pub use authority::{HistoryWarning, PersistReport, PersistenceAuthority};
pub use prune::{PruneReport, dangling_clocks, prune_orphans, reconcile};
pub use settings::{JsonFileSettings, MemorySettings, SettingsStore};
pub use snapshot::StateSnapshot;

pub const HISTORY_KEY: &str = "commandHistory";
pub const SNAPSHOT_KEY: &str = "stateSnapshot";
