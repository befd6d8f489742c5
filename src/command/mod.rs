//! Commands: immutable, uniquely identified, timestamped mutation requests.
//!
//! Each domain's verbs form an exhaustive enum, so `apply` is a single match
//! per domain and an unhandled verb is a compile error rather than a silently
//! ignored string. The wire shape (`{"type": "<domain>/<verb>", "payload": ..}`)
//! is produced in [`wire`].

pub mod wire;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, Tier};
use crate::types::{CommandId, Domain, EntityId, new_command_id};

pub use wire::WireCommand;

/// Current command schema version.
pub const COMMAND_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "verb",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum CharacterCommand {
    Create {
        id: EntityId,
        name: String,
        playbook: String,
    },
    Rename {
        id: EntityId,
        name: String,
    },
    AdjustStress {
        id: EntityId,
        delta: i32,
    },
    Delete {
        id: EntityId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "verb",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum CrewCommand {
    Create {
        id: EntityId,
        name: String,
    },
    Rename {
        id: EntityId,
        name: String,
    },
    /// Additive coin change; commutes with other adjustments.
    AdjustCoin {
        id: EntityId,
        delta: i32,
    },
    /// Absolute coin write; does not commute across concurrent replicas.
    SetCoin {
        id: EntityId,
        coin: u32,
    },
    Delete {
        id: EntityId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "verb",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClockCommand {
    CreateClock {
        clock: Clock,
    },
    /// Logged instead of `CreateClock` when an entity is already at the harm
    /// limit: the least-filled harm clock takes the new label.
    CreateClockReplaced {
        id: EntityId,
        entity_id: EntityId,
        previous_subtype: String,
        subtype: String,
    },
    AddSegments {
        id: EntityId,
        amount: u32,
    },
    ClearSegments {
        id: EntityId,
        amount: u32,
    },
    SetSegments {
        id: EntityId,
        segments: u32,
    },
    FreezeClock {
        id: EntityId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tier: Option<Tier>,
    },
    UnfreezeClock {
        id: EntityId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tier: Option<Tier>,
    },
    DeleteClock {
        id: EntityId,
    },
}

/// A domain-tagged command body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandBody {
    Characters(CharacterCommand),
    Crews(CrewCommand),
    Clocks(ClockCommand),
}

impl CommandBody {
    pub fn domain(&self) -> Domain {
        match self {
            CommandBody::Characters(_) => Domain::Characters,
            CommandBody::Crews(_) => Domain::Crews,
            CommandBody::Clocks(_) => Domain::Clocks,
        }
    }

    /// The id of the entity this command mutates within its own domain.
    pub fn target_id(&self) -> &EntityId {
        match self {
            CommandBody::Characters(command) => match command {
                CharacterCommand::Create { id, .. }
                | CharacterCommand::Rename { id, .. }
                | CharacterCommand::AdjustStress { id, .. }
                | CharacterCommand::Delete { id } => id,
            },
            CommandBody::Crews(command) => match command {
                CrewCommand::Create { id, .. }
                | CrewCommand::Rename { id, .. }
                | CrewCommand::AdjustCoin { id, .. }
                | CrewCommand::SetCoin { id, .. }
                | CrewCommand::Delete { id } => id,
            },
            CommandBody::Clocks(command) => match command {
                ClockCommand::CreateClock { clock } => &clock.id,
                ClockCommand::CreateClockReplaced { id, .. }
                | ClockCommand::AddSegments { id, .. }
                | ClockCommand::ClearSegments { id, .. }
                | ClockCommand::SetSegments { id, .. }
                | ClockCommand::FreezeClock { id, .. }
                | ClockCommand::UnfreezeClock { id, .. }
                | ClockCommand::DeleteClock { id } => id,
            },
        }
    }

    /// Deletion commands are kept as tombstones by every prune.
    pub fn is_deletion(&self) -> bool {
        matches!(
            self,
            CommandBody::Characters(CharacterCommand::Delete { .. })
                | CommandBody::Crews(CrewCommand::Delete { .. })
                | CommandBody::Clocks(ClockCommand::DeleteClock { .. })
        )
    }
}

impl From<CharacterCommand> for CommandBody {
    fn from(command: CharacterCommand) -> Self {
        CommandBody::Characters(command)
    }
}

impl From<CrewCommand> for CommandBody {
    fn from(command: CrewCommand) -> Self {
        CommandBody::Crews(command)
    }
}

impl From<ClockCommand> for CommandBody {
    fn from(command: ClockCommand) -> Self {
        CommandBody::Clocks(command)
    }
}

/// An immutable command with its provenance.
///
/// A freshly generated command gets a new id and timestamp; a replayed or
/// received one keeps the original pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub body: CommandBody,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub command_id: CommandId,
    pub user_id: Option<String>,
    pub version: u32,
}

impl Command {
    /// Wraps a body in a freshly generated envelope.
    pub fn generate(body: impl Into<CommandBody>, timestamp: i64, user_id: Option<String>) -> Self {
        Command {
            body: body.into(),
            timestamp,
            command_id: new_command_id(),
            user_id,
            version: COMMAND_VERSION,
        }
    }

    pub fn domain(&self) -> Domain {
        self.body.domain()
    }

    pub fn target_id(&self) -> &EntityId {
        self.body.target_id()
    }

    pub fn is_deletion(&self) -> bool {
        self.body.is_deletion()
    }

    /// The `<domain>/<verb>` wire type.
    pub fn type_name(&self) -> String {
        wire::type_name(&self.body)
    }
}
