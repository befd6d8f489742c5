//! One client's full local replica: projection, log, seen ids and outbox.
//!
//! The replica is single-threaded with respect to its own state: commands are
//! applied one at a time through [`SessionState::apply`]. Locally generated
//! commands are validated ([`ApplyMode::Local`]). Peers' broadcasts and
//! persisted history are replayed ([`ApplyMode::Replay`]): a failure is logged
//! and skipped instead of aborting.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::clock::{ClockRequest, after_segments_changed, plan_create};
use crate::command::{ClockCommand, Command, CommandBody};
use crate::error::ValidationError;
use crate::history::{CommandHistory, DomainCounts, merge_by_timestamp};
use crate::persistence::StateSnapshot;
use crate::store::{ApplyMode, SessionState};
use crate::sync::dedup::{Outbox, PendingBatch, SeenSet};
use crate::types::{CommandId, Domain, EntityId, TimestampClock, new_entity_id};

/// The commands one local action produced and the entities they touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalChange {
    pub commands: Vec<Command>,
    pub touched: BTreeSet<EntityId>,
}

impl LocalChange {
    /// The entity targeted by the first command of the change.
    pub fn primary_id(&self) -> Option<&EntityId> {
        self.commands.first().map(Command::target_id)
    }
}

/// A previously accepted command that no longer applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedCommand {
    pub command_id: CommandId,
    pub command_type: String,
    pub reason: ValidationError,
}

/// Result of replaying or receiving a batch of commands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub applied: usize,
    pub duplicates: usize,
    pub skipped: Vec<SkippedCommand>,
    pub touched: BTreeSet<EntityId>,
}

impl ReplayReport {
    pub fn merge(&mut self, other: ReplayReport) {
        self.applied += other.applied;
        self.duplicates += other.duplicates;
        self.skipped.extend(other.skipped);
        self.touched.extend(other.touched);
    }
}

#[derive(Debug, Default)]
pub struct Replica {
    state: SessionState,
    history: CommandHistory,
    seen: SeenSet,
    outbox: Outbox,
    clock: TimestampClock,
    user_id: Option<String>,
}

impl Replica {
    /// Creates an empty replica.
    pub fn new(user_id: Option<String>) -> Self {
        Replica {
            user_id,
            ..Replica::default()
        }
    }

    /// Rebuilds a replica from persisted history.
    ///
    /// With a snapshot whose command counts fit the log, the projection is
    /// hydrated from the snapshot and only the log tail after those counts is
    /// replayed. Otherwise the whole log is replayed from empty state. Either
    /// way every logged id ends up in the seen set.
    pub fn restore(
        history: CommandHistory,
        snapshot: Option<StateSnapshot>,
        user_id: Option<String>,
    ) -> (Self, ReplayReport) {
        let mut replica = Replica::new(user_id);

        let snapshot = match snapshot {
            Some(snapshot) if snapshot.fits(&history) => Some(snapshot),
            Some(snapshot) => {
                warn!(
                    "Snapshot from {} does not fit the command log, replaying full history",
                    snapshot.timestamp
                );
                None
            }
            None => None,
        };

        let report = match snapshot {
            Some(snapshot) => {
                let StateSnapshot {
                    timestamp,
                    domains,
                    command_counts,
                    ..
                } = snapshot;
                replica.state = domains;
                for domain in Domain::ALL {
                    let count = command_counts.get(&domain).copied().unwrap_or(0);
                    for command in &history.log(domain)[..count] {
                        replica.clock.observe(command.timestamp);
                        if replica.seen.insert(command.command_id) {
                            replica.history.append(command.clone());
                        }
                    }
                }
                let tail = history.merged_since(&command_counts);
                info!(
                    "Hydrated from snapshot at {}, replaying {} newer command(s)",
                    timestamp,
                    tail.len()
                );
                replica.ingest(tail)
            }
            None => {
                info!("Replaying {} command(s) from empty state", history.total_len());
                replica.ingest(history.merged())
            }
        };

        if !report.skipped.is_empty() {
            warn!(
                "{} command(s) in persisted history failed to replay and were skipped",
                report.skipped.len()
            );
        }
        (replica, report)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn seen(&self) -> &SeenSet {
        &self.seen
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub(crate) fn parts_mut(&mut self) -> (&mut SessionState, &mut CommandHistory) {
        (&mut self.state, &mut self.history)
    }

    /// Generates, validates and applies a local command, then runs the clock
    /// rules on any segment change and applies their follow-up commands.
    pub fn execute(&mut self, body: impl Into<CommandBody>) -> Result<LocalChange, ValidationError> {
        let body = body.into();
        let segments_before = match &body {
            CommandBody::Clocks(
                ClockCommand::AddSegments { id, .. }
                | ClockCommand::ClearSegments { id, .. }
                | ClockCommand::SetSegments { id, .. },
            ) => self
                .state
                .clocks
                .get(id)
                .map(|clock| (id.clone(), clock.segments)),
            // A clock may be created already full.
            CommandBody::Clocks(ClockCommand::CreateClock { clock }) => Some((clock.id.clone(), 0)),
            _ => None,
        };

        let mut change = LocalChange::default();
        self.dispatch(body, &mut change)?;

        if let Some((clock_id, before)) = segments_before {
            for follow_up in after_segments_changed(&self.state.clocks, &clock_id, before) {
                self.dispatch(follow_up.into(), &mut change)?;
            }
        }
        Ok(change)
    }

    /// Creates a clock under the type rules (harm cap, addiction singleton).
    pub fn create_clock(&mut self, request: ClockRequest) -> Result<LocalChange, ValidationError> {
        let command = plan_create(&self.state.clocks, request, new_entity_id())?;
        self.execute(command)
    }

    fn dispatch(&mut self, body: CommandBody, change: &mut LocalChange) -> Result<(), ValidationError> {
        let command = Command::generate(body, self.clock.tick(), self.user_id.clone());
        let outcome = self.state.apply(&command, ApplyMode::Local)?;
        debug!("Applied local {} {}", command.type_name(), command.command_id);

        self.seen.insert(command.command_id);
        self.history.append(command.clone());
        self.outbox.push(command.clone());
        change.touched.extend(outcome.touched);
        change.commands.push(command);
        Ok(())
    }

    /// Merges a remote batch spanning any domains: sorted by timestamp, each
    /// unseen command applied once and recorded with its original identity.
    pub fn apply_remote(&mut self, batch: &BTreeMap<Domain, Vec<Command>>) -> ReplayReport {
        self.ingest(merge_by_timestamp(batch.values().map(Vec::as_slice)))
    }

    /// Replays already-ordered, previously accepted commands.
    ///
    /// A command that fails is still recorded in the log and the seen set: it
    /// may apply cleanly on a later full replay once commands that arrived out
    /// of order sit in timestamp order.
    pub fn ingest<'a, I>(&mut self, commands: I) -> ReplayReport
    where
        I: IntoIterator<Item = &'a Command>,
    {
        let mut report = ReplayReport::default();
        for command in commands {
            if !self.seen.insert(command.command_id) {
                report.duplicates += 1;
                continue;
            }
            if !self.clock.observe(command.timestamp) {
                warn!(
                    "{} {} carries timestamp {} far in the future, local clock not advanced past the skew bound",
                    command.type_name(),
                    command.command_id,
                    command.timestamp
                );
            }
            match self.state.apply(command, ApplyMode::Replay) {
                Ok(outcome) => {
                    report.applied += 1;
                    report.touched.extend(outcome.touched);
                }
                Err(reason) => {
                    warn!(
                        "Skipping {} {} at {}: {}",
                        command.type_name(),
                        command.command_id,
                        command.timestamp,
                        reason
                    );
                    report.skipped.push(SkippedCommand {
                        command_id: command.command_id,
                        command_type: command.type_name(),
                        reason,
                    });
                }
            }
            self.history.append(command.clone());
        }
        if report.duplicates > 0 {
            debug!("Ignored {} already-seen command(s)", report.duplicates);
        }
        report
    }

    /// Locally generated commands not yet broadcast.
    pub fn pending(&self) -> PendingBatch {
        self.outbox.pending()
    }

    /// The oldest `limit` unsent local commands.
    pub fn pending_chunk(&self, limit: usize) -> PendingBatch {
        self.outbox.pending_chunk(limit)
    }

    pub fn pending_len(&self) -> usize {
        self.outbox.pending_len()
    }

    pub fn mark_sent(&mut self, upto: &DomainCounts) {
        self.outbox.mark_sent(upto);
    }
}
