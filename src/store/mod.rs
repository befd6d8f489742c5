//! The state store: a deterministic `apply(state, command)` per domain.
//!
//! First-time (local) application validates and rejects bad input. Replay
//! application runs the same reducers; a failure there means persisted
//! history is corrupt, and the caller logs and skips the command.

pub mod characters;
pub mod crews;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::clock::{ClockTable, apply_clock_command};
use crate::command::{Command, CommandBody};
use crate::error::ValidationError;
use crate::model::{Character, Crew};
use crate::types::{Domain, EntityId};

pub use characters::apply_character_command;
pub use crews::apply_crew_command;

/// Whether a command is being applied for the first time or replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Freshly generated on this replica; invalid input is rejected.
    Local,
    /// Previously accepted history (persisted log or a peer's broadcast).
    Replay,
}

/// Entities whose projection changed, for the UI refresh callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub touched: BTreeSet<EntityId>,
}

impl ApplyOutcome {
    pub fn touching<I: IntoIterator<Item = EntityId>>(ids: I) -> Self {
        ApplyOutcome {
            touched: ids.into_iter().collect(),
        }
    }

    pub fn merge(&mut self, other: ApplyOutcome) {
        self.touched.extend(other.touched);
    }

    pub fn is_empty(&self) -> bool {
        self.touched.is_empty()
    }
}

/// One replica's full projection of every domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub characters: BTreeMap<EntityId, Character>,
    pub crews: BTreeMap<EntityId, Crew>,
    pub clocks: ClockTable,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a command in place. On error the state is left untouched.
    pub fn apply(
        &mut self,
        command: &Command,
        mode: ApplyMode,
    ) -> Result<ApplyOutcome, ValidationError> {
        let timestamp = command.timestamp;
        match &command.body {
            CommandBody::Characters(c) => {
                apply_character_command(&mut self.characters, c, timestamp, mode)
            }
            CommandBody::Crews(c) => apply_crew_command(&mut self.crews, c, timestamp, mode),
            CommandBody::Clocks(c) => apply_clock_command(&mut self.clocks, c, timestamp, mode),
        }
    }

    /// Whether `id` exists in the projection of `domain`.
    pub fn contains(&self, domain: Domain, id: &str) -> bool {
        match domain {
            Domain::Characters => self.characters.contains_key(id),
            Domain::Crews => self.crews.contains_key(id),
            Domain::Clocks => self.clocks.contains_key(id),
        }
    }

    /// Whether `id` names a live entity in any domain.
    pub fn entity_exists(&self, id: &str) -> bool {
        Domain::ALL.into_iter().any(|domain| self.contains(domain, id))
    }

    pub fn len(&self, domain: Domain) -> usize {
        match domain {
            Domain::Characters => self.characters.len(),
            Domain::Crews => self.crews.len(),
            Domain::Clocks => self.clocks.len(),
        }
    }
}

/// Pure form of [`SessionState::apply`]: returns the next state.
pub fn apply(
    state: &SessionState,
    command: &Command,
    mode: ApplyMode,
) -> Result<SessionState, ValidationError> {
    let mut next = state.clone();
    next.apply(command, mode)?;
    Ok(next)
}
