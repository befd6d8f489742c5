//! The single replica allowed to write the merged log to shared storage.
//!
//! Privilege is decided once, at construction. A non-privileged authority
//! still loads history on cold start but never writes. Writes always store the
//! full merged view, never partial appends, so storage needs no locking.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::PersistenceError;
use crate::history::CommandHistory;
use crate::persistence::prune::{PruneReport, prune_orphans, reconcile};
use crate::persistence::settings::SettingsStore;
use crate::persistence::snapshot::StateSnapshot;
use crate::persistence::{HISTORY_KEY, SNAPSHOT_KEY};
use crate::sync::Replica;
use crate::types::{Domain, now_millis};

/// A domain log has grown past the configured threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryWarning {
    pub domain: Domain,
    pub len: usize,
    pub threshold: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistReport {
    /// False when this replica is not privileged and nothing was written.
    pub written: bool,
    pub commands_written: usize,
    pub snapshot_taken: bool,
    pub pruned: Option<PruneReport>,
    pub warnings: Vec<HistoryWarning>,
}

pub struct PersistenceAuthority {
    privileged: bool,
    settings: Arc<dyn SettingsStore>,
    config: SyncConfig,
    /// Total command count covered by the newest snapshot, if one exists.
    snapshot_total: Option<usize>,
    /// The log was rewritten and the stored snapshot may describe commands
    /// that no longer exist. Cleared once the snapshot is invalidated.
    snapshot_stale: bool,
}

impl PersistenceAuthority {
    pub fn new(privileged: bool, settings: Arc<dyn SettingsStore>, config: SyncConfig) -> Self {
        PersistenceAuthority {
            privileged,
            settings,
            config,
            snapshot_total: None,
            snapshot_stale: false,
        }
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    /// Reads the persisted log and snapshot.
    pub fn load(&mut self) -> Result<(CommandHistory, Option<StateSnapshot>), PersistenceError> {
        let history = match self.settings.get(HISTORY_KEY)? {
            None | Some(Value::Null) => CommandHistory::new(),
            Some(value) => serde_json::from_value(value)?,
        };
        let snapshot: Option<StateSnapshot> = match self.settings.get(SNAPSHOT_KEY)? {
            None | Some(Value::Null) => None,
            Some(value) => Some(serde_json::from_value(value)?),
        };
        self.snapshot_total = snapshot.as_ref().map(StateSnapshot::total_commands);
        info!(
            "Loaded {} persisted command(s){}",
            history.total_len(),
            if snapshot.is_some() { " and a snapshot" } else { "" }
        );
        Ok((history, snapshot))
    }

    /// Writes the merged log, takes a snapshot when due, auto-prunes when
    /// enabled, and reports logs that outgrew the warning threshold.
    pub fn persist(&mut self, replica: &mut Replica) -> Result<PersistReport, PersistenceError> {
        if !self.privileged {
            debug!("Not the persistence authority, skipping durable write");
            return Ok(PersistReport::default());
        }

        let mut report = PersistReport {
            written: true,
            ..PersistReport::default()
        };
        self.write_history(replica.history())?;
        report.commands_written = replica.history().total_len();

        if self.snapshot_due(report.commands_written) {
            self.write_snapshot(replica)?;
            report.snapshot_taken = true;
        }

        if self.config.auto_prune {
            let (state, history) = replica.parts_mut();
            let pruned = prune_orphans(history, state);
            if pruned.total_removed() > 0 {
                self.after_prune(replica)?;
                report.commands_written = replica.history().total_len();
            }
            report.pruned = Some(pruned);
        }

        report.warnings = self.history_warnings(replica.history());
        Ok(report)
    }

    /// Manual orphan prune.
    pub fn prune(&mut self, replica: &mut Replica) -> Result<PruneReport, PersistenceError> {
        let (state, history) = replica.parts_mut();
        let report = prune_orphans(history, state);
        if report.total_removed() > 0 {
            self.after_prune(replica)?;
        }
        Ok(report)
    }

    /// Manual cross-domain reconciliation.
    pub fn reconcile(&mut self, replica: &mut Replica) -> Result<PruneReport, PersistenceError> {
        let (state, history) = replica.parts_mut();
        let report = reconcile(history, state);
        if report.total_removed() > 0 || report.dangling_clocks > 0 {
            self.after_prune(replica)?;
        }
        Ok(report)
    }

    /// Captures and writes a snapshot of the replica's current state.
    pub fn write_snapshot(&mut self, replica: &Replica) -> Result<(), PersistenceError> {
        let snapshot = StateSnapshot::capture(replica.state(), replica.history(), now_millis());
        let total = snapshot.total_commands();
        self.settings
            .set(SNAPSHOT_KEY, serde_json::to_value(&snapshot)?)?;
        self.snapshot_total = Some(total);
        info!("Wrote snapshot covering {} command(s)", total);
        Ok(())
    }

    pub fn history_warnings(&self, history: &CommandHistory) -> Vec<HistoryWarning> {
        let threshold = self.config.history_warning_threshold;
        Domain::ALL
            .into_iter()
            .filter(|domain| history.len(*domain) > threshold)
            .map(|domain| {
                let len = history.len(domain);
                warn!(
                    "{} history holds {} commands (threshold {}), consider pruning",
                    domain, len, threshold
                );
                HistoryWarning {
                    domain,
                    len,
                    threshold,
                }
            })
            .collect()
    }

    /// Writes the full log. A stale snapshot is cleared first, so storage
    /// never pairs a rewritten log with counts from before the rewrite.
    fn write_history(&mut self, history: &CommandHistory) -> Result<(), PersistenceError> {
        if self.snapshot_stale {
            self.settings.set(SNAPSHOT_KEY, Value::Null)?;
            self.snapshot_total = None;
            self.snapshot_stale = false;
            info!("Cleared snapshot ahead of a rewritten command log");
        }
        self.settings.set(HISTORY_KEY, serde_json::to_value(history)?)?;
        debug!("Wrote {} command(s) to durable storage", history.total_len());
        Ok(())
    }

    fn snapshot_due(&self, total: usize) -> bool {
        let every = self.config.snapshot_every;
        every > 0 && total >= self.snapshot_total.unwrap_or(0) + every
    }

    /// Rewrites the log after a prune. The old snapshot is cleared before the
    /// shorter log lands, then re-captured if one existed. A failure anywhere
    /// leaves either the old pair or no snapshot at all in storage.
    fn after_prune(&mut self, replica: &Replica) -> Result<(), PersistenceError> {
        let recapture = self.snapshot_total.is_some() || self.snapshot_stale;
        self.snapshot_stale = true;
        self.write_history(replica.history())?;
        if recapture {
            self.write_snapshot(replica)?;
        }
        Ok(())
    }
}
