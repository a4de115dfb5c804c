//! Property-based test generators using proptest.

use entimap_codec::Value;
use entimap_core::Identifier;
use proptest::prelude::*;

/// Strategy for generating identifiers.
pub fn identifier_strategy() -> impl Strategy<Value = Identifier> {
    prop::array::uniform16(any::<u8>()).prop_map(Identifier::from_bytes)
}

/// Strategy for generating person names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    "[A-Z][a-z]{1,11}"
}

/// Strategy for generating flat documents with distinct keys.
pub fn flat_document_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(
        "[a-z][a-z_]{0,7}",
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            "[a-z ]{0,16}".prop_map(Value::Text),
        ],
        0..8,
    )
    .prop_map(Value::map)
}

/// A step of a generated session workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStep {
    /// Save entity `n`.
    Save(usize),
    /// Remove entity `n`.
    Remove(usize),
    /// Change entity `n`.
    Touch(usize),
    /// Flush the session.
    Flush,
}

/// Strategy for workloads over `entities` entities.
pub fn session_steps_strategy(
    entities: usize,
    max_steps: usize,
) -> impl Strategy<Value = Vec<SessionStep>> {
    let entities = entities.max(1);
    prop::collection::vec(
        prop_oneof![
            3 => (0..entities).prop_map(SessionStep::Save),
            2 => (0..entities).prop_map(SessionStep::Remove),
            2 => (0..entities).prop_map(SessionStep::Touch),
            1 => Just(SessionStep::Flush),
        ],
        1..max_steps.max(2),
    )
}
