//! Applies clock commands to the clock projection.

use tracing::{debug, info};

use crate::clock::{ClockTable, ClockType, Tier, clocks_owned_by};
use crate::command::ClockCommand;
use crate::error::ValidationError;
use crate::store::{ApplyMode, ApplyOutcome};
use crate::types::{Domain, EntityId};

fn unknown(id: &EntityId) -> ValidationError {
    ValidationError::UnknownClock(id.clone())
}

fn require_amount(amount: u32) -> Result<(), ValidationError> {
    if amount == 0 {
        return Err(ValidationError::InvalidSegmentAmount { amount });
    }
    Ok(())
}

/// Applies one clock command. Validation happens before any mutation, so a
/// rejected command leaves the table unchanged.
pub fn apply_clock_command(
    table: &mut ClockTable,
    command: &ClockCommand,
    timestamp: i64,
    mode: ApplyMode,
) -> Result<ApplyOutcome, ValidationError> {
    let (clock_id, owner) = match command {
        ClockCommand::CreateClock { clock } => {
            if table.contains_key(&clock.id) {
                return Err(ValidationError::DuplicateEntity {
                    domain: Domain::Clocks,
                    id: clock.id.clone(),
                });
            }
            clock
                .clock_type
                .resolve_max_segments(Some(clock.max_segments), &clock.metadata)?;
            if clock.segments > clock.max_segments {
                return Err(ValidationError::SegmentsOutOfRange {
                    segments: clock.segments,
                    max_segments: clock.max_segments,
                });
            }
            if clock.clock_type == ClockType::Addiction
                && clocks_owned_by(table, &clock.entity_id)
                    .any(|c| c.clock_type == ClockType::Addiction)
            {
                return Err(ValidationError::DuplicateSingleton {
                    entity_id: clock.entity_id.clone(),
                    clock_type: ClockType::Addiction,
                });
            }
            let mut record = clock.clone();
            record.created_at = timestamp;
            record.updated_at = record.updated_at.max(timestamp);
            table.insert(record.id.clone(), record);
            (clock.id.clone(), clock.entity_id.clone())
        }
        ClockCommand::CreateClockReplaced {
            id,
            previous_subtype,
            subtype,
            ..
        } => {
            let clock = table.get_mut(id).ok_or_else(|| unknown(id))?;
            info!(
                "Harm clock {} relabelled {:?} -> {:?} at {} segments",
                id, previous_subtype, subtype, clock.segments
            );
            clock.subtype = subtype.clone();
            clock.updated_at = clock.updated_at.max(timestamp);
            (id.clone(), clock.entity_id.clone())
        }
        ClockCommand::AddSegments { id, amount } => {
            require_amount(*amount)?;
            let clock = table.get_mut(id).ok_or_else(|| unknown(id))?;
            let change = clock.add_segments(*amount);
            if change.clamped {
                info!(
                    "Clock {} capped at {}/{} (requested +{} from {})",
                    id, change.after, clock.max_segments, amount, change.before
                );
            }
            clock.updated_at = clock.updated_at.max(timestamp);
            (id.clone(), clock.entity_id.clone())
        }
        ClockCommand::ClearSegments { id, amount } => {
            require_amount(*amount)?;
            let clock = table.get_mut(id).ok_or_else(|| unknown(id))?;
            let change = clock.clear_segments(*amount);
            if change.clamped {
                debug!("Clock {} floored at 0 (requested -{})", id, amount);
            }
            clock.updated_at = clock.updated_at.max(timestamp);
            (id.clone(), clock.entity_id.clone())
        }
        ClockCommand::SetSegments { id, segments } => {
            let clock = table.get_mut(id).ok_or_else(|| unknown(id))?;
            clock.set_segments(*segments)?;
            clock.updated_at = clock.updated_at.max(timestamp);
            (id.clone(), clock.entity_id.clone())
        }
        ClockCommand::FreezeClock { id, tier } => {
            let clock = table.get_mut(id).ok_or_else(|| unknown(id))?;
            clock.metadata.frozen = true;
            if tier.is_some() {
                clock.metadata.tier = *tier;
            }
            clock.updated_at = clock.updated_at.max(timestamp);
            (id.clone(), clock.entity_id.clone())
        }
        ClockCommand::UnfreezeClock { id, tier } => {
            let clock = table.get_mut(id).ok_or_else(|| unknown(id))?;
            clock.metadata.frozen = false;
            if tier.is_some() {
                clock.metadata.tier = *tier;
            } else if clock.clock_type == ClockType::Consumable {
                clock.metadata.tier = Some(Tier::Accessible);
            }
            clock.updated_at = clock.updated_at.max(timestamp);
            (id.clone(), clock.entity_id.clone())
        }
        ClockCommand::DeleteClock { id } => match table.remove(id) {
            Some(clock) => (id.clone(), clock.entity_id),
            None if mode == ApplyMode::Replay => {
                debug!("Clock {} already deleted, delete is a no-op", id);
                return Ok(ApplyOutcome::default());
            }
            None => return Err(unknown(id)),
        },
    };
    Ok(ApplyOutcome::touching([clock_id, owner]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ClockMetadata};

    fn harm(id: &str, segments: u32) -> Clock {
        Clock {
            id: id.into(),
            entity_id: "e1".into(),
            clock_type: ClockType::Harm,
            subtype: "Cut".into(),
            segments,
            max_segments: 6,
            metadata: ClockMetadata::default(),
            created_at: 0,
            updated_at: 0,
        }
    }

    fn create(table: &mut ClockTable, clock: Clock) {
        apply_clock_command(table, &ClockCommand::CreateClock { clock }, 1, ApplyMode::Local)
            .unwrap();
    }

    #[test]
    fn test_create_stamps_timestamps() {
        let mut table = ClockTable::new();
        apply_clock_command(
            &mut table,
            &ClockCommand::CreateClock { clock: harm("c1", 0) },
            77,
            ApplyMode::Local,
        )
        .unwrap();

        assert_eq!(table["c1"].created_at, 77);
        assert_eq!(table["c1"].updated_at, 77);
    }

    #[test]
    fn test_add_beyond_max_caps_without_error() {
        let mut table = ClockTable::new();
        create(&mut table, harm("c1", 4));

        let add = ClockCommand::AddSegments { id: "c1".into(), amount: 5 };
        let outcome = apply_clock_command(&mut table, &add, 2, ApplyMode::Local).unwrap();

        assert_eq!(table["c1"].segments, 6);
        assert!(outcome.touched.contains("c1"));
        assert!(outcome.touched.contains("e1"));
    }

    #[test]
    fn test_zero_amount_rejected() {
        let mut table = ClockTable::new();
        create(&mut table, harm("c1", 4));

        let add = ClockCommand::AddSegments { id: "c1".into(), amount: 0 };
        assert_eq!(
            apply_clock_command(&mut table, &add, 2, ApplyMode::Local),
            Err(ValidationError::InvalidSegmentAmount { amount: 0 })
        );
    }

    #[test]
    fn test_unknown_clock_rejected() {
        let mut table = ClockTable::new();
        let clear = ClockCommand::ClearSegments { id: "nope".into(), amount: 1 };

        assert_eq!(
            apply_clock_command(&mut table, &clear, 2, ApplyMode::Local),
            Err(ValidationError::UnknownClock("nope".into()))
        );
    }

    #[test]
    fn test_second_addiction_rejected() {
        let mut table = ClockTable::new();
        let mut addiction = harm("a1", 0);
        addiction.clock_type = ClockType::Addiction;
        addiction.max_segments = 8;
        create(&mut table, addiction.clone());

        addiction.id = "a2".into();
        let err = apply_clock_command(
            &mut table,
            &ClockCommand::CreateClock { clock: addiction },
            2,
            ApplyMode::Local,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateSingleton { .. }));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_invalid_progress_size_rejected() {
        let mut table = ClockTable::new();
        let mut progress = harm("p1", 0);
        progress.clock_type = ClockType::Progress;
        progress.max_segments = 5;

        let err = apply_clock_command(
            &mut table,
            &ClockCommand::CreateClock { clock: progress },
            1,
            ApplyMode::Local,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidClockSize { size: 5, .. }));
    }

    #[test]
    fn test_delete_tombstones_projection() {
        let mut table = ClockTable::new();
        create(&mut table, harm("c1", 1));
        let delete = ClockCommand::DeleteClock { id: "c1".into() };

        apply_clock_command(&mut table, &delete, 2, ApplyMode::Local).unwrap();
        assert!(table.is_empty());
        assert!(apply_clock_command(&mut table, &delete, 3, ApplyMode::Local).is_err());
        assert!(apply_clock_command(&mut table, &delete, 3, ApplyMode::Replay).is_ok());
    }
}
