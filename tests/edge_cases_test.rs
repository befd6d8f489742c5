//! Edge case integration tests for the session sync core.
//!
//! These tests verify that broadcast and persistence failures never undo
//! local state, that the circuit breaker contains runaway broadcasts, and
//! that cold start survives stale snapshots and corrupt history.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use session_sync::SyncError;
use session_sync::clock::{ClockRequest, Rarity};
use session_sync::command::{ClockCommand, Command, CrewCommand};
use session_sync::config::SyncConfig;
use session_sync::error::PersistenceError;
use session_sync::history::{CommandHistory, DomainCounts};
use session_sync::persistence::{
    HISTORY_KEY, HistoryWarning, JsonFileSettings, MemorySettings, SNAPSHOT_KEY, SettingsStore,
    StateSnapshot,
};
use session_sync::session::{CommitReport, RefreshNotifier, SessionOptions, SyncSession};
use session_sync::store::SessionState;
use session_sync::sync::LoopbackHub;
use session_sync::types::{Domain, EntityId};

fn crew(id: &str) -> CrewCommand {
    CrewCommand::Create {
        id: id.into(),
        name: "Bravos".into(),
    }
}

fn adjust(id: &str, delta: i32) -> CrewCommand {
    CrewCommand::AdjustCoin {
        id: id.into(),
        delta,
    }
}

fn start(
    hub: &LoopbackHub,
    id: &str,
    settings: Arc<dyn SettingsStore>,
    privileged: bool,
    config: SyncConfig,
) -> SyncSession {
    let options = SessionOptions::new(id).privileged(privileged).config(config);
    SyncSession::start(Arc::new(hub.connect(id)), settings, options)
        .unwrap()
        .0
}

fn quiet_config() -> SyncConfig {
    SyncConfig {
        snapshot_every: 0,
        ..SyncConfig::default()
    }
}

#[test]
fn test_breaker_opens_at_session_ceiling_until_reset() {
    let hub = LoopbackHub::new();
    let config = SyncConfig {
        session_broadcast_ceiling: Some(2),
        ..quiet_config()
    };
    let mut session = start(&hub, "a", Arc::new(MemorySettings::new()), false, config);

    assert!(session.execute(crew("crew-1")).unwrap().is_clean());
    assert!(session.execute(adjust("crew-1", 1)).unwrap().is_clean());
    let refused = session.execute(adjust("crew-1", 1)).unwrap();

    assert!(matches!(refused.failures[..], [SyncError::CircuitOpen { .. }]));
    assert_eq!(session.state().crews["crew-1"].coin, 2);
    assert!(session.broadcaster().breaker().is_open());
    assert_eq!(hub.sent_messages().len(), 2);

    session.reset_breaker();
    let flushed = session.flush();
    assert_eq!(flushed.broadcast, 1);
    assert_eq!(hub.sent_messages().len(), 3);
}

fn fill_rare_consumable(session: &mut SyncSession) -> CommitReport {
    session.execute(crew("crew-1")).unwrap();
    let request = ClockRequest::consumable("crew-1", "Bandolier", Rarity::Rare);
    let first = session
        .create_clock(request.clone().with_segments(5))
        .unwrap();
    session.create_clock(request).unwrap();
    let id = first.change.primary_id().unwrap().clone();

    // Filling the clock yields one add plus two freezes.
    session
        .execute(ClockCommand::AddSegments { id, amount: 1 })
        .unwrap()
}

#[test]
fn test_follow_up_burst_is_sent_in_chunks() {
    let hub = LoopbackHub::new();
    let config = SyncConfig {
        max_commands_per_broadcast: 2,
        ..quiet_config()
    };
    let mut session = start(&hub, "a", Arc::new(MemorySettings::new()), false, config);
    let peer = start(&hub, "b", Arc::new(MemorySettings::new()), false, quiet_config()).into_shared();

    let report = fill_rare_consumable(&mut session);

    assert!(report.is_clean());
    assert_eq!(report.change.commands.len(), 3);
    assert_eq!(report.broadcast, 3);
    let counts: Vec<usize> = hub.sent_messages().iter().map(|m| m.command_count).collect();
    assert_eq!(counts, vec![1, 1, 1, 2, 1]);
    assert!(!session.broadcaster().breaker().is_open());
    assert!(session.state().clocks.values().all(|c| c.metadata.frozen));
    assert_eq!(peer.lock().state(), session.state());
}

#[test]
fn test_reset_breaker_flushes_window_larger_than_one_broadcast() {
    let hub = LoopbackHub::new();
    let config = SyncConfig {
        max_commands_per_broadcast: 2,
        session_broadcast_ceiling: Some(4),
        ..quiet_config()
    };
    let mut session = start(&hub, "a", Arc::new(MemorySettings::new()), false, config);
    let peer = start(&hub, "b", Arc::new(MemorySettings::new()), false, quiet_config()).into_shared();

    let refused = fill_rare_consumable(&mut session);
    assert!(matches!(
        refused.failures[..],
        [SyncError::CircuitOpen { pending: 3, limit: 4 }]
    ));
    assert_eq!(session.replica().pending_len(), 3);

    session.reset_breaker();
    let flushed = session.flush();

    assert!(flushed.is_clean());
    assert_eq!(flushed.broadcast, 3);
    assert!(!session.broadcaster().breaker().is_open());
    assert_eq!(session.replica().pending_len(), 0);
    assert_eq!(peer.lock().state(), session.state());

    // A second flush has nothing left and stays closed.
    assert_eq!(session.flush().broadcast, 0);
    assert!(!session.broadcaster().breaker().is_open());
}

#[test]
fn test_transport_failure_keeps_local_state_and_retries() {
    let hub = LoopbackHub::new();
    let mut a = start(&hub, "a", Arc::new(MemorySettings::new()), false, quiet_config());
    let b = start(&hub, "b", Arc::new(MemorySettings::new()), false, quiet_config()).into_shared();

    hub.set_offline("a", true);
    let report = a.execute(crew("crew-1")).unwrap();
    assert!(matches!(report.failures[..], [SyncError::Transport(_)]));
    assert!(a.state().crews.contains_key("crew-1"));
    assert!(b.lock().state().crews.is_empty());

    hub.set_offline("a", false);
    let report = a.execute(adjust("crew-1", 2)).unwrap();
    assert_eq!(report.broadcast, 2);
    assert_eq!(b.lock().state(), a.state());
}

#[test]
fn test_persistence_failure_does_not_block_broadcast() {
    let hub = LoopbackHub::new();
    let settings = Arc::new(MemorySettings::new());
    let mut gm = start(&hub, "gm", settings.clone(), true, quiet_config());
    let player = start(&hub, "p", Arc::new(MemorySettings::new()), false, quiet_config()).into_shared();

    settings.set_fail_writes(true);
    let report = gm.execute(crew("crew-1")).unwrap();
    assert_eq!(report.broadcast, 1);
    assert!(matches!(report.failures[..], [SyncError::Persistence(_)]));
    assert!(player.lock().state().crews.contains_key("crew-1"));

    settings.set_fail_writes(false);
    gm.execute(adjust("crew-1", 1)).unwrap();
    let stored: CommandHistory =
        serde_json::from_value(settings.get(HISTORY_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(stored.len(Domain::Crews), 2);
}

#[test]
fn test_cold_start_hydrates_snapshot_and_replays_tail() {
    let hub = LoopbackHub::new();
    let settings = Arc::new(MemorySettings::new());
    let config = SyncConfig {
        snapshot_every: 2,
        ..SyncConfig::default()
    };
    let mut gm = start(&hub, "gm", settings.clone(), true, config.clone());
    gm.execute(crew("crew-1")).unwrap();
    gm.execute(adjust("crew-1", 3)).unwrap();
    gm.execute(adjust("crew-1", 4)).unwrap();

    let snapshot: StateSnapshot =
        serde_json::from_value(settings.get(SNAPSHOT_KEY).unwrap().unwrap()).unwrap();
    assert_eq!(snapshot.total_commands(), 2);

    let options = SessionOptions::new("gm-restarted").privileged(true).config(config);
    let (restarted, report) =
        SyncSession::start(Arc::new(hub.connect("gm-restarted")), settings, options).unwrap();

    assert_eq!(report.applied, 1);
    assert_eq!(restarted.state(), gm.state());
    assert_eq!(restarted.state().crews["crew-1"].coin, 7);
    assert_eq!(restarted.replica().seen().len(), 3);
}

#[test]
fn test_stale_snapshot_falls_back_to_full_replay() {
    let hub = LoopbackHub::new();
    let settings = Arc::new(MemorySettings::new());
    let mut gm = start(&hub, "gm", settings.clone(), true, quiet_config());
    gm.execute(crew("crew-1")).unwrap();
    gm.execute(adjust("crew-1", 2)).unwrap();

    let stale = StateSnapshot {
        timestamp: 1,
        domains: SessionState::default(),
        command_counts: DomainCounts::from([(Domain::Crews, 10)]),
        boundary_ids: Default::default(),
    };
    settings
        .set(SNAPSHOT_KEY, serde_json::to_value(&stale).unwrap())
        .unwrap();

    let (restarted, report) = SyncSession::start(
        Arc::new(hub.connect("late")),
        settings,
        SessionOptions::new("late"),
    )
    .unwrap();

    assert_eq!(report.applied, 2);
    assert_eq!(restarted.state(), gm.state());
}

/// Memory settings whose snapshot writes can be made to fail on their own.
#[derive(Default)]
struct SnapshotOutage {
    inner: MemorySettings,
    down: Mutex<bool>,
}

impl SettingsStore for SnapshotOutage {
    fn get(&self, key: &str) -> Result<Option<Value>, PersistenceError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: Value) -> Result<(), PersistenceError> {
        if key == SNAPSHOT_KEY && *self.down.lock() {
            return Err(PersistenceError::write(key, "snapshot storage unavailable"));
        }
        self.inner.set(key, value)
    }
}

fn restart_from(settings: Arc<dyn SettingsStore>) -> SyncSession {
    let hub = LoopbackHub::new();
    SyncSession::start(
        Arc::new(hub.connect("restarted")),
        settings,
        SessionOptions::new("restarted"),
    )
    .unwrap()
    .0
}

#[test]
fn test_failed_snapshot_write_after_prune_does_not_resurrect_deleted_entities() {
    let hub = LoopbackHub::new();
    let settings = Arc::new(SnapshotOutage::default());
    let config = SyncConfig {
        snapshot_every: 2,
        ..SyncConfig::default()
    };
    let mut gm = start(&hub, "gm", settings.clone(), true, config);
    gm.execute(crew("c1")).unwrap();
    gm.execute(crew("c2")).unwrap();
    assert!(settings.get(SNAPSHOT_KEY).unwrap().is_some());

    *settings.down.lock() = true;
    let deleted = gm.execute(CrewCommand::Delete { id: "c1".into() }).unwrap();
    assert!(matches!(deleted.failures[..], [SyncError::Persistence(_)]));
    let adjusted = gm.execute(adjust("c2", 1)).unwrap();
    assert!(matches!(adjusted.failures[..], [SyncError::Persistence(_)]));

    let during = restart_from(settings.clone());
    let ids: Vec<&String> = during.state().crews.keys().collect();
    assert_eq!(ids, vec!["c2"]);

    *settings.down.lock() = false;
    assert!(gm.execute(adjust("c2", 1)).unwrap().is_clean());

    let after = restart_from(settings.clone());
    assert_eq!(after.state(), gm.state());
    assert_eq!(after.state().crews["c2"].coin, 2);
}

#[test]
fn test_corrupt_history_is_skipped_on_replay() {
    let settings = Arc::new(MemorySettings::new());
    let mut history = CommandHistory::new();
    history.append(Command::generate(crew("crew-1"), 10, None));
    history.append(Command::generate(
        ClockCommand::AddSegments { id: "ghost".into(), amount: 2 },
        11,
        None,
    ));
    history.append(Command::generate(adjust("crew-1", 3), 12, None));
    settings
        .set(HISTORY_KEY, serde_json::to_value(&history).unwrap())
        .unwrap();

    let hub = LoopbackHub::new();
    let (session, report) = SyncSession::start(
        Arc::new(hub.connect("a")),
        settings,
        SessionOptions::new("a"),
    )
    .unwrap();

    assert_eq!(report.applied, 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].command_type, "clocks/addSegments");
    assert_eq!(session.state().crews["crew-1"].coin, 3);
    assert_eq!(session.replica().history().total_len(), 3);
}

#[derive(Default)]
struct Recorder {
    refreshed: Mutex<Vec<BTreeSet<EntityId>>>,
    warnings: Mutex<Vec<HistoryWarning>>,
}

impl RefreshNotifier for Recorder {
    fn refresh(&self, entity_ids: &BTreeSet<EntityId>) {
        self.refreshed.lock().push(entity_ids.clone());
    }

    fn history_warning(&self, warning: &HistoryWarning) {
        self.warnings.lock().push(warning.clone());
    }
}

#[test]
fn test_history_warning_reaches_notifier() {
    let hub = LoopbackHub::new();
    let config = SyncConfig {
        history_warning_threshold: 2,
        ..quiet_config()
    };
    let recorder = Arc::new(Recorder::default());
    let mut gm = start(&hub, "gm", Arc::new(MemorySettings::new()), true, config)
        .with_notifier(recorder.clone());

    gm.execute(crew("crew-1")).unwrap();
    gm.execute(adjust("crew-1", 1)).unwrap();
    assert!(recorder.warnings.lock().is_empty());
    gm.execute(adjust("crew-1", 1)).unwrap();

    let warnings = recorder.warnings.lock();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].domain, Domain::Crews);
    assert_eq!(warnings[0].len, 3);
    assert_eq!(recorder.refreshed.lock().len(), 3);
}

#[test]
fn test_received_commands_refresh_touched_entities() {
    let hub = LoopbackHub::new();
    let recorder = Arc::new(Recorder::default());
    let mut a = start(&hub, "a", Arc::new(MemorySettings::new()), false, quiet_config());
    let _b = start(&hub, "b", Arc::new(MemorySettings::new()), false, quiet_config())
        .with_notifier(recorder.clone())
        .into_shared();

    a.execute(crew("crew-1")).unwrap();

    let refreshed = recorder.refreshed.lock();
    assert_eq!(refreshed.len(), 1);
    assert!(refreshed[0].contains("crew-1"));
}

#[test]
fn test_json_file_store_survives_restart() {
    let path = std::env::temp_dir().join(format!("session-sync-edge-{}.json", uuid::Uuid::new_v4()));
    let hub = LoopbackHub::new();

    let expected = {
        let settings = Arc::new(JsonFileSettings::open(&path).unwrap());
        let mut gm = start(&hub, "gm", settings, true, quiet_config());
        gm.execute(crew("crew-1")).unwrap();
        gm.execute(adjust("crew-1", 5)).unwrap();
        gm.state().clone()
    };

    let settings = Arc::new(JsonFileSettings::open(&path).unwrap());
    let (session, report) = SyncSession::start(
        Arc::new(hub.connect("again")),
        settings,
        SessionOptions::new("again"),
    )
    .unwrap();

    assert_eq!(report.applied, 2);
    assert_eq!(session.state(), &expected);
    let _ = std::fs::remove_file(&path);
}
