//! Clock subsystem: bounded counters with per-type rules.
//!
//! The primitive segment operations live on [`Clock`] and only ever clamp to
//! `[0, max_segments]`. Type-specific behavior (the harm cap, the addiction
//! singleton, consumable freezing) is layered on top in [`rules`], which plans
//! commands before they are applied and emits follow-up commands after a
//! segment change. [`reducer`] applies clock commands to the projection.

pub mod model;
pub mod reducer;
pub mod rules;

use std::collections::BTreeMap;

pub use model::{
    ADDICTION_SEGMENTS, Clock, ClockMetadata, ClockType, DEFAULT_HARM_SEGMENTS, HARM_LIMIT,
    PROGRESS_SIZES, Rarity, SegmentChange, Tier,
};
pub use reducer::apply_clock_command;
pub use rules::{ClockRequest, after_segments_changed, plan_create};

use crate::types::EntityId;

/// The clock projection, keyed by clock id.
pub type ClockTable = BTreeMap<EntityId, Clock>;

/// Iterates the clocks owned by `entity_id`.
pub fn clocks_owned_by<'a, 'b>(
    table: &'a ClockTable,
    entity_id: &'b str,
) -> impl Iterator<Item = &'a Clock> {
    table
        .values()
        .filter(move |clock| clock.entity_id == entity_id)
}
