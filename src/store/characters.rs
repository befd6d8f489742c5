use std::collections::BTreeMap;

use tracing::debug;

use crate::command::CharacterCommand;
use crate::error::ValidationError;
use crate::model::Character;
use crate::store::{ApplyMode, ApplyOutcome};
use crate::types::{Domain, EntityId};

fn unknown(id: &EntityId) -> ValidationError {
    ValidationError::UnknownEntity {
        domain: Domain::Characters,
        id: id.clone(),
    }
}

pub fn apply_character_command(
    characters: &mut BTreeMap<EntityId, Character>,
    command: &CharacterCommand,
    timestamp: i64,
    mode: ApplyMode,
) -> Result<ApplyOutcome, ValidationError> {
    match command {
        CharacterCommand::Create { id, name, playbook } => {
            if characters.contains_key(id) {
                return Err(ValidationError::DuplicateEntity {
                    domain: Domain::Characters,
                    id: id.clone(),
                });
            }
            if name.trim().is_empty() {
                return Err(ValidationError::EmptyName);
            }
            characters.insert(
                id.clone(),
                Character::new(id.clone(), name.clone(), playbook.clone(), timestamp),
            );
        }
        CharacterCommand::Rename { id, name } => {
            if name.trim().is_empty() {
                return Err(ValidationError::EmptyName);
            }
            let character = characters.get_mut(id).ok_or_else(|| unknown(id))?;
            character.name = name.clone();
            character.updated_at = character.updated_at.max(timestamp);
        }
        CharacterCommand::AdjustStress { id, delta } => {
            let character = characters.get_mut(id).ok_or_else(|| unknown(id))?;
            character.adjust_stress(*delta);
            character.updated_at = character.updated_at.max(timestamp);
        }
        CharacterCommand::Delete { id } => {
            if characters.remove(id).is_none() {
                if mode == ApplyMode::Local {
                    return Err(unknown(id));
                }
                debug!("Character {} already deleted, delete is a no-op", id);
                return Ok(ApplyOutcome::default());
            }
        }
    }
    Ok(ApplyOutcome::touching([command_target(command).clone()]))
}

fn command_target(command: &CharacterCommand) -> &EntityId {
    match command {
        CharacterCommand::Create { id, .. }
        | CharacterCommand::Rename { id, .. }
        | CharacterCommand::AdjustStress { id, .. }
        | CharacterCommand::Delete { id } => id,
    }
}
