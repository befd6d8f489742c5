use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::command::CrewCommand;
use crate::error::ValidationError;
use crate::model::Crew;
use crate::store::{ApplyMode, ApplyOutcome};
use crate::types::{Domain, EntityId};

fn unknown(id: &EntityId) -> ValidationError {
    ValidationError::UnknownEntity {
        domain: Domain::Crews,
        id: id.clone(),
    }
}

pub fn apply_crew_command(
    crews: &mut BTreeMap<EntityId, Crew>,
    command: &CrewCommand,
    timestamp: i64,
    mode: ApplyMode,
) -> Result<ApplyOutcome, ValidationError> {
    let id = match command {
        CrewCommand::Create { id, name } => {
            if crews.contains_key(id) {
                return Err(ValidationError::DuplicateEntity {
                    domain: Domain::Crews,
                    id: id.clone(),
                });
            }
            if name.trim().is_empty() {
                return Err(ValidationError::EmptyName);
            }
            crews.insert(id.clone(), Crew::new(id.clone(), name.clone(), timestamp));
            id
        }
        CrewCommand::Rename { id, name } => {
            if name.trim().is_empty() {
                return Err(ValidationError::EmptyName);
            }
            let crew = crews.get_mut(id).ok_or_else(|| unknown(id))?;
            crew.name = name.clone();
            crew.updated_at = crew.updated_at.max(timestamp);
            id
        }
        CrewCommand::AdjustCoin { id, delta } => {
            let crew = crews.get_mut(id).ok_or_else(|| unknown(id))?;
            crew.coin = match (crew.coin_after(*delta), mode) {
                (Some(coin), _) => coin,
                (None, ApplyMode::Local) => {
                    return Err(ValidationError::InsufficientResource {
                        id: id.clone(),
                        available: crew.coin,
                        requested: delta.unsigned_abs(),
                    });
                }
                // Concurrent spends can overdraw; replay floors at zero.
                (None, ApplyMode::Replay) => {
                    warn!(
                        "Crew {} coin spend of {} overdraws {}, flooring at zero",
                        id, delta, crew.coin
                    );
                    0
                }
            };
            crew.updated_at = crew.updated_at.max(timestamp);
            id
        }
        CrewCommand::SetCoin { id, coin } => {
            let crew = crews.get_mut(id).ok_or_else(|| unknown(id))?;
            crew.coin = *coin;
            crew.updated_at = crew.updated_at.max(timestamp);
            id
        }
        CrewCommand::Delete { id } => {
            if crews.remove(id).is_none() {
                if mode == ApplyMode::Local {
                    return Err(unknown(id));
                }
                debug!("Crew {} already deleted, delete is a no-op", id);
                return Ok(ApplyOutcome::default());
            }
            id
        }
    };
    Ok(ApplyOutcome::touching([id.clone()]))
}
