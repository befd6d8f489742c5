//! Clock records and their primitive segment operations.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::types::EntityId;

/// Maximum number of harm clocks per owning entity.
pub const HARM_LIMIT: usize = 3;
/// Harm clock size when the caller does not ask for another.
pub const DEFAULT_HARM_SEGMENTS: u32 = 6;
/// Addiction clocks always have this many segments.
pub const ADDICTION_SEGMENTS: u32 = 8;
/// The sizes a progress clock may have.
pub const PROGRESS_SIZES: [u32; 5] = [4, 6, 8, 10, 12];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockType {
    Harm,
    Consumable,
    Addiction,
    Progress,
}

impl fmt::Display for ClockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClockType::Harm => "harm",
            ClockType::Consumable => "consumable",
            ClockType::Addiction => "addiction",
            ClockType::Progress => "progress",
        };
        f.write_str(name)
    }
}

impl ClockType {
    /// Resolves and validates the segment count of a new clock of this type.
    pub fn resolve_max_segments(
        &self,
        requested: Option<u32>,
        metadata: &ClockMetadata,
    ) -> Result<u32, ValidationError> {
        let invalid = |size| ValidationError::InvalidClockSize {
            clock_type: *self,
            size,
        };
        match self {
            ClockType::Harm => match requested.unwrap_or(DEFAULT_HARM_SEGMENTS) {
                0 => Err(invalid(0)),
                size => Ok(size),
            },
            ClockType::Addiction => match requested {
                None | Some(ADDICTION_SEGMENTS) => Ok(ADDICTION_SEGMENTS),
                Some(size) => Err(invalid(size)),
            },
            ClockType::Consumable => {
                let size = metadata.rarity.unwrap_or_default().max_segments();
                match requested {
                    Some(other) if other != size => Err(invalid(other)),
                    _ => Ok(size),
                }
            }
            ClockType::Progress => match requested {
                Some(size) if PROGRESS_SIZES.contains(&size) => Ok(size),
                Some(size) => Err(invalid(size)),
                None => Err(invalid(0)),
            },
        }
    }

    /// Whether filling a clock of this type freezes it.
    pub fn freezes_when_full(&self) -> bool {
        matches!(self, ClockType::Consumable | ClockType::Addiction)
    }
}

/// How scarce a consumable is; rarer consumables run out sooner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    #[default]
    Common,
    Uncommon,
    Rare,
}

impl Rarity {
    pub fn max_segments(&self) -> u32 {
        match self {
            Rarity::Common => 12,
            Rarity::Uncommon => 8,
            Rarity::Rare => 6,
        }
    }
}

/// Whether a consumable can still be drawn on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Accessible,
    Inaccessible,
}

/// Type-specific flags carried by a clock.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClockMetadata {
    pub frozen: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rarity: Option<Rarity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub countdown: bool,
}

/// A bounded counter owned by a character or crew.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clock {
    pub id: EntityId,
    /// Owning entity. A weak reference: resolved by lookup, never enforced.
    pub entity_id: EntityId,
    pub clock_type: ClockType,
    pub subtype: String,
    pub segments: u32,
    pub max_segments: u32,
    #[serde(default)]
    pub metadata: ClockMetadata,
    pub created_at: i64,
    pub updated_at: i64,
}

/// The result of a primitive segment operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentChange {
    pub before: u32,
    pub after: u32,
    /// The requested change was clamped at a bound.
    pub clamped: bool,
}

impl Clock {
    pub fn is_full(&self) -> bool {
        self.segments >= self.max_segments
    }

    pub fn is_frozen(&self) -> bool {
        self.metadata.frozen
    }

    /// Adds segments, capping at `max_segments`. Over-dealt harm still lands.
    pub fn add_segments(&mut self, amount: u32) -> SegmentChange {
        let before = self.segments;
        let wanted = before.saturating_add(amount);
        self.segments = wanted.min(self.max_segments);
        SegmentChange {
            before,
            after: self.segments,
            clamped: wanted > self.max_segments,
        }
    }

    /// Removes segments, flooring at zero.
    pub fn clear_segments(&mut self, amount: u32) -> SegmentChange {
        let before = self.segments;
        self.segments = before.saturating_sub(amount);
        SegmentChange {
            before,
            after: self.segments,
            clamped: amount > before,
        }
    }

    /// Sets an absolute segment count, which must lie in `[0, max_segments]`.
    pub fn set_segments(&mut self, segments: u32) -> Result<SegmentChange, ValidationError> {
        if segments > self.max_segments {
            return Err(ValidationError::SegmentsOutOfRange {
                segments,
                max_segments: self.max_segments,
            });
        }
        let before = self.segments;
        self.segments = segments;
        Ok(SegmentChange {
            before,
            after: segments,
            clamped: false,
        })
    }
}
