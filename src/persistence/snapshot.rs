//! Full-state snapshots that bound replay cost on cold start.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::history::{CommandHistory, DomainCounts};
use crate::store::SessionState;
use crate::types::{CommandId, Domain};

/// A serialized projection of every domain plus the per-domain log lengths it
/// reflects. Cold start hydrates from `domains` and replays only the commands
/// past `command_counts`.
///
/// `boundary_ids` holds the id of the last command each count covers. A log
/// that was pruned after the capture can grow back to the same length, so the
/// count alone does not prove the snapshot still describes its prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    pub timestamp: i64,
    pub domains: SessionState,
    #[serde(default)]
    pub command_counts: DomainCounts,
    #[serde(default)]
    pub boundary_ids: BTreeMap<Domain, CommandId>,
}

impl StateSnapshot {
    pub fn capture(state: &SessionState, history: &CommandHistory, timestamp: i64) -> Self {
        StateSnapshot {
            timestamp,
            domains: state.clone(),
            command_counts: history.counts(),
            boundary_ids: Domain::ALL
                .into_iter()
                .filter_map(|domain| {
                    history
                        .log(domain)
                        .last()
                        .map(|command| (domain, command.command_id))
                })
                .collect(),
        }
    }

    /// Whether the recorded counts are prefixes of `history`'s logs ending at
    /// the recorded boundary commands.
    pub fn fits(&self, history: &CommandHistory) -> bool {
        Domain::ALL.into_iter().all(|domain| {
            let count = self.command_counts.get(&domain).copied().unwrap_or(0);
            let log = history.log(domain);
            if count > log.len() {
                return false;
            }
            match (count.checked_sub(1), self.boundary_ids.get(&domain)) {
                (Some(last), Some(id)) => log[last].command_id == *id,
                _ => true,
            }
        })
    }

    pub fn total_commands(&self) -> usize {
        self.command_counts.values().sum()
    }
}
