//! Identifier types and generators.

use uuid::Uuid;

/// Identifier of a character, crew or clock projection.
///
/// Clocks reference their owner by this id only; the reference is resolved by
/// lookup and checked at prune time, never enforced structurally.
pub type EntityId = String;

/// Stable identity of a command. Preserved verbatim when a command is replayed
/// or received from a peer, which is what makes deduplication possible.
pub type CommandId = Uuid;

/// Identifier of a replica (one connected client).
pub type ReplicaId = String;

/// Generates a fresh entity id.
pub fn new_entity_id() -> EntityId {
    Uuid::new_v4().simple().to_string()
}

/// Generates a fresh command id.
pub fn new_command_id() -> CommandId {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(new_entity_id(), new_entity_id());
        assert_ne!(new_command_id(), new_command_id());
    }

    #[test]
    fn test_entity_id_is_compact() {
        let id = new_entity_id();
        assert_eq!(id.len(), 32);
        assert!(!id.contains('-'));
    }
}
