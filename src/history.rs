//! Per-domain append-only command logs.
//!
//! Each domain keeps its own ordered log. Cross-domain causality is restored
//! only when commands are merged for replay: every domain's commands are
//! sorted together by timestamp, ties broken by domain rank and then by log
//! position.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::types::{CommandId, Domain};

/// A command count per domain (log lengths, snapshot offsets, send offsets).
pub type DomainCounts = BTreeMap<Domain, usize>;

/// Sorts commands from several domains into global replay order.
///
/// The sort is stable, so commands with equal keys keep the order in which
/// they were supplied (domain rank, then log position).
pub fn merge_by_timestamp<'a, I>(logs: I) -> Vec<&'a Command>
where
    I: IntoIterator<Item = &'a [Command]>,
{
    let mut merged: Vec<&Command> = logs.into_iter().flatten().collect();
    merged.sort_by_key(|command| (command.timestamp, command.domain()));
    merged
}

/// The command history of a session: one log per domain.
///
/// Serialized as `{"characters": [..], "crews": [..], "clocks": [..]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandHistory {
    characters: Vec<Command>,
    crews: Vec<Command>,
    clocks: Vec<Command>,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self, domain: Domain) -> &[Command] {
        match domain {
            Domain::Characters => &self.characters,
            Domain::Crews => &self.crews,
            Domain::Clocks => &self.clocks,
        }
    }

    fn log_mut(&mut self, domain: Domain) -> &mut Vec<Command> {
        match domain {
            Domain::Characters => &mut self.characters,
            Domain::Crews => &mut self.crews,
            Domain::Clocks => &mut self.clocks,
        }
    }

    /// Appends a command to its domain's log.
    pub fn append(&mut self, command: Command) {
        self.log_mut(command.domain()).push(command);
    }

    /// Commands of `domain` after the first `offset`.
    pub fn since(&self, domain: Domain, offset: usize) -> &[Command] {
        let log = self.log(domain);
        &log[offset.min(log.len())..]
    }

    pub fn len(&self, domain: Domain) -> usize {
        self.log(domain).len()
    }

    pub fn total_len(&self) -> usize {
        Domain::ALL.into_iter().map(|domain| self.len(domain)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    pub fn counts(&self) -> DomainCounts {
        Domain::ALL
            .into_iter()
            .map(|domain| (domain, self.len(domain)))
            .collect()
    }

    /// Every command of every domain in global replay order.
    pub fn merged(&self) -> Vec<&Command> {
        merge_by_timestamp(Domain::ALL.into_iter().map(|domain| self.log(domain)))
    }

    /// Commands after the given per-domain offsets, in global replay order.
    pub fn merged_since(&self, offsets: &DomainCounts) -> Vec<&Command> {
        merge_by_timestamp(Domain::ALL.into_iter().map(|domain| {
            let offset = offsets.get(&domain).copied().unwrap_or(0);
            self.since(domain, offset)
        }))
    }

    /// Keeps only the commands of `domain` matching `keep`; returns how many
    /// were removed.
    pub fn retain<F>(&mut self, domain: Domain, keep: F) -> usize
    where
        F: FnMut(&Command) -> bool,
    {
        let log = self.log_mut(domain);
        let before = log.len();
        log.retain(keep);
        before - log.len()
    }

    pub fn command_ids(&self) -> HashSet<CommandId> {
        Domain::ALL
            .into_iter()
            .flat_map(|domain| self.log(domain))
            .map(|command| command.command_id)
            .collect()
    }
}
