//! Type-specific clock rules layered over the primitive segment operations.
//!
//! Rules run only when a command is first generated. Their decisions are
//! written into the log as concrete commands (`CreateClockReplaced`,
//! `FreezeClock`, `UnfreezeClock`), so replay never re-decides anything.

use tracing::info;

use crate::clock::{
    Clock, ClockMetadata, ClockTable, ClockType, HARM_LIMIT, Rarity, Tier, clocks_owned_by,
};
use crate::command::ClockCommand;
use crate::error::ValidationError;
use crate::types::EntityId;

/// A request to create a clock, before type rules are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockRequest {
    pub entity_id: EntityId,
    pub clock_type: ClockType,
    pub subtype: String,
    pub max_segments: Option<u32>,
    pub segments: u32,
    pub metadata: ClockMetadata,
}

impl ClockRequest {
    pub fn new(entity_id: impl Into<EntityId>, clock_type: ClockType, subtype: impl Into<String>) -> Self {
        ClockRequest {
            entity_id: entity_id.into(),
            clock_type,
            subtype: subtype.into(),
            max_segments: None,
            segments: 0,
            metadata: ClockMetadata::default(),
        }
    }

    pub fn harm(entity_id: impl Into<EntityId>, subtype: impl Into<String>) -> Self {
        Self::new(entity_id, ClockType::Harm, subtype)
    }

    pub fn addiction(entity_id: impl Into<EntityId>, subtype: impl Into<String>) -> Self {
        Self::new(entity_id, ClockType::Addiction, subtype)
    }

    pub fn consumable(
        entity_id: impl Into<EntityId>,
        subtype: impl Into<String>,
        rarity: Rarity,
    ) -> Self {
        let mut request = Self::new(entity_id, ClockType::Consumable, subtype);
        request.metadata.rarity = Some(rarity);
        request
    }

    pub fn progress(entity_id: impl Into<EntityId>, subtype: impl Into<String>, size: u32) -> Self {
        let mut request = Self::new(entity_id, ClockType::Progress, subtype);
        request.max_segments = Some(size);
        request
    }

    pub fn with_max_segments(mut self, max_segments: u32) -> Self {
        self.max_segments = Some(max_segments);
        self
    }

    pub fn with_segments(mut self, segments: u32) -> Self {
        self.segments = segments;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.metadata.category = Some(category.into());
        self
    }

    pub fn countdown(mut self) -> Self {
        self.metadata.countdown = true;
        self
    }
}

/// Decides which command a create request turns into.
///
/// A fourth harm clock does not add a record: the existing harm clock with the
/// fewest segments takes the new label and keeps its segments. A second
/// addiction clock is rejected.
pub fn plan_create(
    table: &ClockTable,
    request: ClockRequest,
    new_id: EntityId,
) -> Result<ClockCommand, ValidationError> {
    let max_segments = request
        .clock_type
        .resolve_max_segments(request.max_segments, &request.metadata)?;
    if request.segments > max_segments {
        return Err(ValidationError::SegmentsOutOfRange {
            segments: request.segments,
            max_segments,
        });
    }

    match request.clock_type {
        ClockType::Addiction => {
            if clocks_owned_by(table, &request.entity_id)
                .any(|c| c.clock_type == ClockType::Addiction)
            {
                return Err(ValidationError::DuplicateSingleton {
                    entity_id: request.entity_id,
                    clock_type: ClockType::Addiction,
                });
            }
        }
        ClockType::Harm => {
            let harm: Vec<&Clock> = clocks_owned_by(table, &request.entity_id)
                .filter(|c| c.clock_type == ClockType::Harm)
                .collect();
            if harm.len() >= HARM_LIMIT {
                let least = harm
                    .into_iter()
                    .min_by(|a, b| {
                        (a.segments, a.created_at, &a.id).cmp(&(b.segments, b.created_at, &b.id))
                    });
                if let Some(least) = least {
                    info!(
                        "Entity {} at harm limit, replacing {:?} on clock {}",
                        request.entity_id, least.subtype, least.id
                    );
                    return Ok(ClockCommand::CreateClockReplaced {
                        id: least.id.clone(),
                        entity_id: request.entity_id,
                        previous_subtype: least.subtype.clone(),
                        subtype: request.subtype,
                    });
                }
            }
        }
        ClockType::Consumable | ClockType::Progress => {}
    }

    let mut metadata = request.metadata;
    metadata.frozen = false;
    if request.clock_type == ClockType::Consumable {
        metadata.rarity = Some(metadata.rarity.unwrap_or_default());
        metadata.tier = Some(metadata.tier.unwrap_or_default());
    } else {
        metadata.tier = None;
    }

    Ok(ClockCommand::CreateClock {
        clock: Clock {
            id: new_id,
            entity_id: request.entity_id,
            clock_type: request.clock_type,
            subtype: request.subtype,
            segments: request.segments,
            max_segments,
            metadata,
            created_at: 0,
            updated_at: 0,
        },
    })
}

/// Follow-up commands after a clock's segments moved from `before`.
///
/// Filling an addiction freezes it. Filling a consumable freezes it and every
/// consumable sibling with the same owner and subtype, marking them
/// inaccessible. Dropping a full, frozen clock below max unfreezes that clock
/// alone.
pub fn after_segments_changed(table: &ClockTable, clock_id: &str, before: u32) -> Vec<ClockCommand> {
    let Some(clock) = table.get(clock_id) else {
        return Vec::new();
    };
    if !clock.clock_type.freezes_when_full() {
        return Vec::new();
    }

    if clock.is_full() {
        match clock.clock_type {
            ClockType::Addiction if !clock.is_frozen() => vec![ClockCommand::FreezeClock {
                id: clock.id.clone(),
                tier: None,
            }],
            ClockType::Consumable => {
                let frozen: Vec<ClockCommand> = clocks_owned_by(table, &clock.entity_id)
                    .filter(|c| c.clock_type == ClockType::Consumable && c.subtype == clock.subtype)
                    .filter(|c| !(c.is_frozen() && c.metadata.tier == Some(Tier::Inaccessible)))
                    .map(|c| ClockCommand::FreezeClock {
                        id: c.id.clone(),
                        tier: Some(Tier::Inaccessible),
                    })
                    .collect();
                if !frozen.is_empty() {
                    info!(
                        "Consumable {:?} of {} exhausted, freezing {} clock(s)",
                        clock.subtype,
                        clock.entity_id,
                        frozen.len()
                    );
                }
                frozen
            }
            _ => Vec::new(),
        }
    } else if clock.is_frozen() && before >= clock.max_segments && clock.segments < before {
        let tier = (clock.clock_type == ClockType::Consumable).then_some(Tier::Accessible);
        vec![ClockCommand::UnfreezeClock {
            id: clock.id.clone(),
            tier,
        }]
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::apply_clock_command;
    use crate::store::ApplyMode;

    fn apply(table: &mut ClockTable, command: &ClockCommand) {
        apply_clock_command(table, command, 1, ApplyMode::Local).unwrap();
    }

    fn create(table: &mut ClockTable, request: ClockRequest, id: &str) -> ClockCommand {
        let command = plan_create(table, request, id.into()).unwrap();
        apply(table, &command);
        command
    }

    #[test]
    fn test_fourth_harm_replaces_least_filled_label() {
        let mut table = ClockTable::new();
        create(&mut table, ClockRequest::harm("e1", "Broken Arm").with_segments(2), "h1");
        create(&mut table, ClockRequest::harm("e1", "Stabbed").with_segments(5), "h2");
        create(&mut table, ClockRequest::harm("e1", "Bruised").with_segments(1), "h3");

        let command = create(&mut table, ClockRequest::harm("e1", "Fire"), "h4");

        assert_eq!(
            command,
            ClockCommand::CreateClockReplaced {
                id: "h3".into(),
                entity_id: "e1".into(),
                previous_subtype: "Bruised".into(),
                subtype: "Fire".into(),
            }
        );
        assert_eq!(table.len(), 3);
        assert_eq!(table["h3"].subtype, "Fire");
        assert_eq!(table["h3"].segments, 1);
    }

    #[test]
    fn test_harm_limit_is_per_entity() {
        let mut table = ClockTable::new();
        for (i, subtype) in ["A", "B", "C"].into_iter().enumerate() {
            create(&mut table, ClockRequest::harm("e1", subtype), &format!("h{}", i));
        }

        let command = plan_create(&table, ClockRequest::harm("e2", "Fire"), "x".into()).unwrap();
        assert!(matches!(command, ClockCommand::CreateClock { .. }));
    }

    #[test]
    fn test_duplicate_addiction_rejected() {
        let mut table = ClockTable::new();
        create(&mut table, ClockRequest::addiction("e1", "Dreams"), "a1");

        let err = plan_create(&table, ClockRequest::addiction("e1", "Spirits"), "a2".into());
        assert_eq!(
            err,
            Err(ValidationError::DuplicateSingleton {
                entity_id: "e1".into(),
                clock_type: ClockType::Addiction,
            })
        );
    }

    #[test]
    fn test_consumable_metadata_defaults() {
        let table = ClockTable::new();
        let command = plan_create(
            &table,
            ClockRequest::consumable("crew-1", "Frag Grenades", Rarity::Uncommon),
            "g1".into(),
        )
        .unwrap();

        let ClockCommand::CreateClock { clock } = command else {
            panic!("expected CreateClock");
        };
        assert_eq!(clock.max_segments, 8);
        assert_eq!(clock.metadata.tier, Some(Tier::Accessible));
        assert!(!clock.metadata.frozen);
    }

    #[test]
    fn test_initial_segments_validated() {
        let table = ClockTable::new();
        let request = ClockRequest::progress("crew-1", "Heist", 4).with_segments(5);

        assert!(matches!(
            plan_create(&table, request, "p1".into()),
            Err(ValidationError::SegmentsOutOfRange { segments: 5, max_segments: 4 })
        ));
    }

    #[test]
    fn test_filling_consumable_freezes_siblings() {
        let mut table = ClockTable::new();
        let grenades = ClockRequest::consumable("crew-1", "Frag Grenades", Rarity::Uncommon);
        create(&mut table, grenades.clone().with_segments(5), "g1");
        create(&mut table, grenades.with_segments(3), "g2");
        create(
            &mut table,
            ClockRequest::consumable("crew-1", "Smoke", Rarity::Uncommon),
            "s1",
        );

        apply(&mut table, &ClockCommand::AddSegments { id: "g1".into(), amount: 3 });
        let follow_up = after_segments_changed(&table, "g1", 5);
        for command in &follow_up {
            apply(&mut table, command);
        }

        assert_eq!(follow_up.len(), 2);
        for id in ["g1", "g2"] {
            assert!(table[id].metadata.frozen);
            assert_eq!(table[id].metadata.tier, Some(Tier::Inaccessible));
        }
        assert!(!table["s1"].metadata.frozen);
    }

    #[test]
    fn test_filling_addiction_freezes_it() {
        let mut table = ClockTable::new();
        create(&mut table, ClockRequest::addiction("e1", "Dreams").with_segments(7), "a1");
        apply(&mut table, &ClockCommand::AddSegments { id: "a1".into(), amount: 1 });

        let follow_up = after_segments_changed(&table, "a1", 7);
        assert_eq!(follow_up, vec![ClockCommand::FreezeClock { id: "a1".into(), tier: None }]);
    }

    #[test]
    fn test_harm_and_progress_never_freeze() {
        let mut table = ClockTable::new();
        create(&mut table, ClockRequest::harm("e1", "Cut").with_segments(6), "h1");
        create(&mut table, ClockRequest::progress("e1", "Escape", 4).with_segments(4), "p1");

        assert!(after_segments_changed(&table, "h1", 5).is_empty());
        assert!(after_segments_changed(&table, "p1", 3).is_empty());
    }

    #[test]
    fn test_clearing_full_clock_unfreezes_only_it() {
        let mut table = ClockTable::new();
        let grenades = ClockRequest::consumable("crew-1", "Frag Grenades", Rarity::Uncommon);
        create(&mut table, grenades.clone().with_segments(7), "g1");
        create(&mut table, grenades.with_segments(3), "g2");
        apply(&mut table, &ClockCommand::AddSegments { id: "g1".into(), amount: 1 });
        for command in after_segments_changed(&table, "g1", 7) {
            apply(&mut table, &command);
        }

        apply(&mut table, &ClockCommand::ClearSegments { id: "g1".into(), amount: 2 });
        let follow_up = after_segments_changed(&table, "g1", 8);
        assert_eq!(
            follow_up,
            vec![ClockCommand::UnfreezeClock { id: "g1".into(), tier: Some(Tier::Accessible) }]
        );

        // A frozen sibling gaining or losing segments stays frozen.
        apply(&mut table, &ClockCommand::AddSegments { id: "g2".into(), amount: 1 });
        assert!(after_segments_changed(&table, "g2", 3).is_empty());
    }
}
