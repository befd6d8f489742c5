//! One replica's sync session: the glue between the local replica, the
//! broadcaster and the persistence authority.
//!
//! A local action is validated and applied first, then the UI is told what
//! changed, then new commands are broadcast, and only then does the authority
//! write. Transport and persistence failures are logged and reported in the
//! [`CommitReport`]; they never undo or block the local change.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::clock::ClockRequest;
use crate::command::{ClockCommand, CommandBody};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::persistence::{
    HistoryWarning, PersistReport, PersistenceAuthority, PruneReport, SettingsStore, dangling_clocks,
};
use crate::store::SessionState;
use crate::sync::{
    BroadcastMessage, Broadcaster, CircuitBreaker, LocalChange, Replica, ReplayReport, Transport,
};
use crate::types::{EntityId, ReplicaId};

/// Tells the presentation layer which entities need re-rendering.
pub trait RefreshNotifier: Send + Sync {
    fn refresh(&self, entity_ids: &BTreeSet<EntityId>);

    fn history_warning(&self, _warning: &HistoryWarning) {}
}

/// Notifier for headless replicas.
pub struct NoopNotifier;

impl RefreshNotifier for NoopNotifier {
    fn refresh(&self, _entity_ids: &BTreeSet<EntityId>) {}
}

/// Who this replica is and how it behaves.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub replica_id: ReplicaId,
    pub label: String,
    pub user_id: Option<String>,
    /// Whether this replica is the persistence authority.
    pub privileged: bool,
    pub config: SyncConfig,
}

impl SessionOptions {
    pub fn new(replica_id: impl Into<ReplicaId>) -> Self {
        let replica_id = replica_id.into();
        SessionOptions {
            label: replica_id.clone(),
            replica_id,
            user_id: None,
            privileged: false,
            config: SyncConfig::default(),
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }
}

/// Outcome of committing a local change.
#[derive(Debug, Default)]
pub struct CommitReport {
    pub change: LocalChange,
    /// Commands that went out in this commit's broadcast.
    pub broadcast: usize,
    pub persisted: Option<PersistReport>,
    /// Non-fatal transport and persistence failures.
    pub failures: Vec<SyncError>,
}

impl CommitReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub type SharedSession = Arc<Mutex<SyncSession>>;

pub struct SyncSession {
    replica: Replica,
    broadcaster: Broadcaster,
    authority: PersistenceAuthority,
    notifier: Arc<dyn RefreshNotifier>,
}

impl SyncSession {
    /// Cold start: loads the persisted log (and snapshot), rebuilds the
    /// replica and wires up the broadcaster.
    pub fn start(
        transport: Arc<dyn Transport>,
        settings: Arc<dyn SettingsStore>,
        options: SessionOptions,
    ) -> Result<(Self, ReplayReport), SyncError> {
        let SessionOptions {
            replica_id,
            label,
            user_id,
            privileged,
            config,
        } = options;

        let mut authority = PersistenceAuthority::new(privileged, settings, config.clone());
        let (history, snapshot) = authority.load()?;
        let (replica, report) = Replica::restore(history, snapshot, user_id);

        let breaker = CircuitBreaker::new(
            config.max_commands_per_broadcast,
            config.session_broadcast_ceiling,
        );
        let broadcaster = Broadcaster::new(transport, replica_id, label, breaker);
        info!(
            "Session {} started with {} command(s){}",
            broadcaster.sender_id(),
            replica.history().total_len(),
            if privileged { " as persistence authority" } else { "" }
        );

        let session = SyncSession {
            replica,
            broadcaster,
            authority,
            notifier: Arc::new(NoopNotifier),
        };
        Ok((session, report))
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn RefreshNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Moves the session behind a mutex and subscribes it to the transport.
    /// The subscription holds a weak reference, so dropping the last
    /// [`SharedSession`] ends delivery.
    pub fn into_shared(self) -> SharedSession {
        let transport = self.broadcaster.transport().clone();
        let shared = Arc::new(Mutex::new(self));
        let weak = Arc::downgrade(&shared);
        transport.on_receive(Box::new(move |message| {
            if let Some(session) = weak.upgrade() {
                session.lock().receive(&message);
            }
        }));
        shared
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub fn state(&self) -> &SessionState {
        self.replica.state()
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn authority(&self) -> &PersistenceAuthority {
        &self.authority
    }

    pub fn is_privileged(&self) -> bool {
        self.authority.is_privileged()
    }

    /// Executes a local command and commits it.
    ///
    /// Only a validation failure is an error; nothing is logged or sent then.
    pub fn execute(&mut self, body: impl Into<CommandBody>) -> Result<CommitReport, SyncError> {
        let change = self.replica.execute(body)?;
        Ok(self.commit(change))
    }

    pub fn create_clock(&mut self, request: ClockRequest) -> Result<CommitReport, SyncError> {
        let change = self.replica.create_clock(request)?;
        Ok(self.commit(change))
    }

    /// Retries the broadcast of anything still pending, e.g. after a
    /// transport failure or a breaker reset.
    pub fn flush(&mut self) -> CommitReport {
        self.commit(LocalChange::default())
    }

    fn commit(&mut self, change: LocalChange) -> CommitReport {
        if !change.touched.is_empty() {
            self.notifier.refresh(&change.touched);
        }
        let mut report = CommitReport {
            change,
            ..CommitReport::default()
        };

        match self.broadcaster.broadcast_pending(&mut self.replica) {
            Ok(sent) => report.broadcast = sent,
            Err(e) => {
                warn!("Local change kept, broadcast deferred: {}", e);
                report.failures.push(e);
            }
        }

        if self.authority.is_privileged() {
            report.persisted = self.persist(&mut report.failures);
        }
        report
    }

    /// Applies a peer's broadcast. The authority persists afterwards.
    pub fn receive(&mut self, message: &BroadcastMessage) -> ReplayReport {
        let report = self.broadcaster.receive(&mut self.replica, message);
        if !report.touched.is_empty() {
            self.notifier.refresh(&report.touched);
        }
        let logged = report.applied + report.skipped.len();
        if logged > 0 && self.authority.is_privileged() {
            let mut failures = Vec::new();
            self.persist(&mut failures);
        }
        report
    }

    fn persist(&mut self, failures: &mut Vec<SyncError>) -> Option<PersistReport> {
        match self.authority.persist(&mut self.replica) {
            Ok(report) => {
                for warning in &report.warnings {
                    self.notifier.history_warning(warning);
                }
                Some(report)
            }
            Err(e) => {
                error!("Durable write failed, will retry with the next change: {}", e);
                failures.push(e.into());
                None
            }
        }
    }

    /// Manual orphan prune. Authority only.
    pub fn prune_history(&mut self) -> Result<PruneReport, SyncError> {
        if !self.authority.is_privileged() {
            return Err(SyncError::NotAuthority);
        }
        Ok(self.authority.prune(&mut self.replica)?)
    }

    /// Manual reconciliation across domains. Authority only.
    ///
    /// Clocks whose owner is gone are deleted through ordinary `deleteClock`
    /// commands, so every peer drops them too. The log is then reconciled.
    pub fn reconcile(&mut self) -> Result<PruneReport, SyncError> {
        if !self.authority.is_privileged() {
            return Err(SyncError::NotAuthority);
        }
        let dangling = dangling_clocks(self.replica.state());
        let mut report = PruneReport::default();
        if !dangling.is_empty() {
            info!("Deleting {} clock(s) whose owner no longer exists", dangling.len());
            let mut change = LocalChange::default();
            for id in &dangling {
                let deleted = self
                    .replica
                    .execute(ClockCommand::DeleteClock { id: id.clone() })?;
                change.commands.extend(deleted.commands);
                change.touched.extend(deleted.touched);
            }
            let committed = self.commit(change);
            if let Some(pruned) = committed.persisted.and_then(|persisted| persisted.pruned) {
                report.merge(pruned);
            }
            report.dangling_clocks = dangling.len();
        }

        let before: BTreeSet<EntityId> = self.replica.state().clocks.keys().cloned().collect();
        report.merge(self.authority.reconcile(&mut self.replica)?);
        let dropped: BTreeSet<EntityId> = before
            .into_iter()
            .filter(|id| !self.replica.state().clocks.contains_key(id))
            .collect();
        if !dropped.is_empty() {
            self.notifier.refresh(&dropped);
        }
        Ok(report)
    }

    /// Closes the circuit breaker and starts a fresh broadcast budget.
    pub fn reset_breaker(&mut self) {
        info!("Circuit breaker reset for {}", self.broadcaster.sender_id());
        self.broadcaster.reset_breaker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CharacterCommand, CrewCommand};
    use crate::persistence::{HISTORY_KEY, MemorySettings};
    use crate::sync::LoopbackHub;

    #[derive(Default)]
    struct Recorder {
        refreshed: Mutex<Vec<BTreeSet<EntityId>>>,
    }

    impl RefreshNotifier for Recorder {
        fn refresh(&self, entity_ids: &BTreeSet<EntityId>) {
            self.refreshed.lock().push(entity_ids.clone());
        }
    }

    fn start(hub: &LoopbackHub, id: &str, privileged: bool) -> (SyncSession, Arc<MemorySettings>) {
        let settings = Arc::new(MemorySettings::new());
        let (session, _) = SyncSession::start(
            Arc::new(hub.connect(id)),
            settings.clone(),
            SessionOptions::new(id).privileged(privileged),
        )
        .unwrap();
        (session, settings)
    }

    #[test]
    fn test_execute_notifies_broadcasts_and_persists() {
        let hub = LoopbackHub::new();
        let (session, settings) = start(&hub, "gm", true);
        let recorder = Arc::new(Recorder::default());
        let mut session = session.with_notifier(recorder.clone());

        let report = session
            .execute(CrewCommand::Create { id: "crew-1".into(), name: "Bravos".into() })
            .unwrap();

        assert!(report.is_clean());
        assert_eq!(report.broadcast, 1);
        assert!(report.persisted.as_ref().is_some_and(|p| p.written));
        assert_eq!(recorder.refreshed.lock().len(), 1);
        assert!(settings.get(HISTORY_KEY).unwrap().is_some());
    }

    #[test]
    fn test_validation_failure_is_an_error() {
        let hub = LoopbackHub::new();
        let (mut session, _) = start(&hub, "a", false);

        let result = session.execute(CharacterCommand::Rename {
            id: "missing".into(),
            name: "Nobody".into(),
        });

        assert!(matches!(result, Err(SyncError::Validation(_))));
        assert!(hub.sent_messages().is_empty());
    }

    #[test]
    fn test_non_authority_cannot_prune() {
        let hub = LoopbackHub::new();
        let (mut session, _) = start(&hub, "a", false);

        assert!(matches!(session.prune_history(), Err(SyncError::NotAuthority)));
        assert!(matches!(session.reconcile(), Err(SyncError::NotAuthority)));
    }

    #[test]
    fn test_shared_sessions_converge() {
        let hub = LoopbackHub::new();
        let a = start(&hub, "a", false).0.into_shared();
        let b = start(&hub, "b", true).0.into_shared();

        a.lock()
            .execute(CrewCommand::Create { id: "crew-1".into(), name: "Bravos".into() })
            .unwrap();
        b.lock()
            .execute(CrewCommand::AdjustCoin { id: "crew-1".into(), delta: 3 })
            .unwrap();

        assert_eq!(a.lock().state(), b.lock().state());
        assert_eq!(a.lock().state().crews["crew-1"].coin, 3);
    }
}
