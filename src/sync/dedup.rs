//! Receive-side seen-id tracking and send-side outbox offsets.

use std::collections::{BTreeMap, HashSet};

use crate::command::Command;
use crate::history::{DomainCounts, merge_by_timestamp};
use crate::types::{CommandId, Domain};

/// Every command id this replica has executed or recorded.
#[derive(Debug, Clone, Default)]
pub struct SeenSet {
    ids: HashSet<CommandId>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `id`; returns `false` if it was already seen.
    pub fn insert(&mut self, id: CommandId) -> bool {
        self.ids.insert(id)
    }

    pub fn contains(&self, id: &CommandId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<CommandId> for SeenSet {
    fn from_iter<I: IntoIterator<Item = CommandId>>(iter: I) -> Self {
        SeenSet {
            ids: iter.into_iter().collect(),
        }
    }
}

/// Locally generated commands and how many of them were already broadcast.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    generated: BTreeMap<Domain, Vec<Command>>,
    last_sent: DomainCounts,
}

/// The commands to broadcast now and the offsets they advance to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingBatch {
    pub commands: BTreeMap<Domain, Vec<Command>>,
    pub upto: DomainCounts,
}

impl PendingBatch {
    pub fn len(&self) -> usize {
        self.commands.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.generated
            .entry(command.domain())
            .or_default()
            .push(command);
    }

    /// Count of locally generated commands in `domain`.
    pub fn generated(&self, domain: Domain) -> usize {
        self.generated.get(&domain).map_or(0, Vec::len)
    }

    /// Count of locally generated commands in `domain` already broadcast.
    pub fn last_sent(&self, domain: Domain) -> usize {
        self.last_sent.get(&domain).copied().unwrap_or(0)
    }

    /// The window of commands generated since the last successful send.
    pub fn pending(&self) -> PendingBatch {
        self.pending_chunk(usize::MAX)
    }

    /// Count of commands in the unsent window.
    pub fn pending_len(&self) -> usize {
        self.generated
            .iter()
            .map(|(domain, commands)| commands.len().saturating_sub(self.last_sent(*domain)))
            .sum()
    }

    /// The oldest `limit` commands of the unsent window, by timestamp.
    ///
    /// Local timestamps strictly increase, so the chunk is a prefix of every
    /// domain's window and `upto` stays a plain per-domain offset.
    pub fn pending_chunk(&self, limit: usize) -> PendingBatch {
        let mut batch = PendingBatch::default();
        for (domain, commands) in &self.generated {
            batch.upto.insert(*domain, self.last_sent(*domain).min(commands.len()));
        }
        let windows = self
            .generated
            .iter()
            .map(|(domain, commands)| &commands[self.last_sent(*domain).min(commands.len())..]);
        let chosen: Vec<&Command> = merge_by_timestamp(windows).into_iter().take(limit).collect();

        for command in chosen {
            let domain = command.domain();
            batch.commands.entry(domain).or_default().push(command.clone());
            *batch.upto.entry(domain).or_insert(0) += 1;
        }
        batch
    }

    /// Advances the send offsets; offsets never move backwards.
    pub fn mark_sent(&mut self, upto: &DomainCounts) {
        for (domain, count) in upto {
            let sent = self.last_sent.entry(*domain).or_insert(0);
            *sent = (*sent).max(*count);
        }
    }
}
