//! Property-based test generators using proptest.

use cubby_core::{Namespace, Operation};
use proptest::prelude::*;

/// Strategy for namespace tuples, including empty and separator-heavy fields.
pub fn namespace_strategy() -> impl Strategy<Value = Namespace> {
    let field = || prop::string::string_regex("[a-z0-9:/_]{0,12}").expect("Invalid regex");
    (field(), field(), field()).prop_map(|(kind, name, disc)| Namespace::new(kind, name, disc))
}

/// Strategy for keys drawn from a small alphabet so operations collide.
pub fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::sample::select(vec!["a", "b", "c", "d", "e"]).prop_map(|k| k.as_bytes().to_vec())
}

/// Strategy for values, empty ones included.
pub fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

/// Strategy for a single client operation.
pub fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        key_strategy().prop_map(Operation::get),
        (key_strategy(), value_strategy()).prop_map(|(k, v)| Operation::set(k, v)),
        key_strategy().prop_map(Operation::delete),
    ]
}

/// Strategy for a sequence of operations.
pub fn operations_strategy(max_len: usize) -> impl Strategy<Value = Vec<Operation>> {
    prop::collection::vec(operation_strategy(), 0..max_len)
}
