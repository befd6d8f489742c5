use serde::{Deserialize, Serialize};

use crate::types::EntityId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Crew {
    pub id: EntityId,
    pub name: String,
    pub coin: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Crew {
    pub fn new(id: EntityId, name: String, timestamp: i64) -> Self {
        Crew {
            id,
            name,
            coin: 0,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Coin after applying `delta`, or `None` if it would go negative.
    pub fn coin_after(&self, delta: i32) -> Option<u32> {
        let next = self.coin as i64 + delta as i64;
        u32::try_from(next).ok()
    }
}
