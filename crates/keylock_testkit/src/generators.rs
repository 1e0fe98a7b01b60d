//! Property-based test generators using proptest.

use keylock_core::KeySet;
use keylock_store::{Document, Key, KeyPath, Value};
use proptest::prelude::*;

/// Strategy for generating kinds.
pub fn kind_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-zA-Z]{0,11}").expect("Invalid regex")
}

/// Strategy for generating valid keys, with or without a namespace.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    let path = prop_oneof![
        prop::string::string_regex("[a-z0-9-]{1,16}")
            .expect("Invalid regex")
            .prop_map(KeyPath::Name),
        (1i64..=i64::MAX).prop_map(KeyPath::Id),
    ];
    let namespace = prop::option::of(prop::string::string_regex("[a-z]{0,6}").expect("Invalid regex"));

    (namespace, kind_strategy(), path).prop_map(|(namespace, kind, path)| {
        let key = match path {
            KeyPath::Id(id) => Key::id(kind, id),
            KeyPath::Name(name) => Key::name(kind, name),
        };
        match namespace {
            Some(ns) => key.with_namespace(ns),
            None => key,
        }
    })
}

/// Strategy for generating flat documents of scalars.
pub fn document_strategy() -> impl Strategy<Value = Document> {
    let scalar = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        prop::string::string_regex("[a-z ]{0,12}")
            .expect("Invalid regex")
            .prop_map(Value::from),
    ];
    prop::collection::btree_map(
        prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex"),
        scalar,
        0..6,
    )
    .prop_map(|fields| fields.into_iter().collect())
}

/// Strategy for generating key sets of 1..=`max` participants.
///
/// Participants may repeat a key under different names.
pub fn keyset_strategy(max: usize) -> impl Strategy<Value = KeySet> {
    prop::collection::vec(key_strategy(), 1..=max.max(1)).prop_flat_map(|keys| {
        let len = keys.len();
        prop::collection::vec(0..len, 1..=len).prop_map(move |picks| {
            picks
                .into_iter()
                .enumerate()
                .map(|(i, k)| (format!("p{i}"), keys[k].clone()))
                .collect()
        })
    })
}
