use serde::{Deserialize, Serialize};

use crate::types::EntityId;

pub const MAX_STRESS: u32 = 9;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub id: EntityId,
    pub name: String,
    pub playbook: String,
    pub stress: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Character {
    pub fn new(id: EntityId, name: String, playbook: String, timestamp: i64) -> Self {
        Character {
            id,
            name,
            playbook,
            stress: 0,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Applies a stress delta, clamped to `[0, MAX_STRESS]`.
    pub fn adjust_stress(&mut self, delta: i32) {
        let next = (self.stress as i64 + delta as i64).clamp(0, MAX_STRESS as i64);
        self.stress = next as u32;
    }
}
