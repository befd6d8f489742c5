//! Orphan pruning of the command log.
//!
//! An orphaned command is a non-deletion command whose target is missing
//! from its domain's projection. Deletion commands always survive as
//! tombstones, which replay treats as no-ops once their target is gone.

use std::collections::HashMap;

use tracing::info;

use crate::command::{ClockCommand, CommandBody};
use crate::history::{CommandHistory, DomainCounts};
use crate::store::SessionState;
use crate::types::{Domain, EntityId};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: DomainCounts,
    /// Clock projections dropped because their owner no longer exists.
    pub dangling_clocks: usize,
}

impl PruneReport {
    pub fn total_removed(&self) -> usize {
        self.removed.values().sum()
    }

    pub fn merge(&mut self, other: PruneReport) {
        for (domain, count) in other.removed {
            *self.removed.entry(domain).or_insert(0) += count;
        }
        self.dangling_clocks += other.dangling_clocks;
    }
}

/// Removes every orphaned command, domain by domain.
pub fn prune_orphans(history: &mut CommandHistory, state: &SessionState) -> PruneReport {
    let mut report = PruneReport::default();
    for domain in Domain::ALL {
        let removed = history.retain(domain, |command| {
            command.is_deletion() || state.contains(domain, command.target_id())
        });
        report.removed.insert(domain, removed);
    }
    if report.total_removed() > 0 {
        info!("Pruned {} orphaned command(s): {:?}", report.total_removed(), report.removed);
    }
    report
}

/// Clocks whose owning character or crew no longer exists.
pub fn dangling_clocks(state: &SessionState) -> Vec<EntityId> {
    state
        .clocks
        .values()
        .filter(|clock| {
            !state.characters.contains_key(&clock.entity_id)
                && !state.crews.contains_key(&clock.entity_id)
        })
        .map(|clock| clock.id.clone())
        .collect()
}

/// Cross-domain reconciliation: besides orphan pruning, drops every clock
/// command (except deletions) and clock projection whose owning entity no
/// longer exists in any domain.
pub fn reconcile(history: &mut CommandHistory, state: &mut SessionState) -> PruneReport {
    let mut owners: HashMap<EntityId, EntityId> = state
        .clocks
        .values()
        .map(|clock| (clock.id.clone(), clock.entity_id.clone()))
        .collect();
    for command in history.log(Domain::Clocks) {
        if let CommandBody::Clocks(ClockCommand::CreateClock { clock }) = &command.body {
            owners
                .entry(clock.id.clone())
                .or_insert_with(|| clock.entity_id.clone());
        }
    }
    let owner_alive = |clock_id: &str, state: &SessionState| match owners.get(clock_id) {
        Some(owner) => state.characters.contains_key(owner) || state.crews.contains_key(owner),
        None => true,
    };

    let dangling: Vec<EntityId> = {
        let view: &SessionState = state;
        view.clocks
            .keys()
            .filter(|id| !owner_alive(id.as_str(), view))
            .cloned()
            .collect()
    };
    for id in &dangling {
        state.clocks.remove(id);
    }

    let snapshot: &SessionState = state;
    let removed = history.retain(Domain::Clocks, |command| {
        command.is_deletion() || owner_alive(command.target_id().as_str(), snapshot)
    });

    let mut report = PruneReport {
        removed: DomainCounts::from([(Domain::Clocks, removed)]),
        dangling_clocks: dangling.len(),
    };
    report.merge(prune_orphans(history, state));
    info!(
        "Reconciled history: {} command(s) removed, {} dangling clock(s) dropped",
        report.total_removed(),
        report.dangling_clocks
    );
    report
}
