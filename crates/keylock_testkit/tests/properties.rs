//! Property tests over generated keys and documents.

use keylock_core::{lock_token, CoreError, KeySet, MutationOutcome};
use keylock_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::HashSet;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn failed_mutation_leaves_committed_state_identical(
        keys in keyset_strategy(4),
        bodies in prop::collection::vec(document_strategy(), 4),
    ) {
        let t = TestCoordinator::new();
        for (i, (_, key)) in keys.iter().enumerate() {
            t.store.put_committed(key.clone(), bodies[i % bodies.len()].clone());
        }
        let before: Vec<_> = keys.iter().map(|(_, k)| t.document(k)).collect();

        let err = t
            .run_with_retry(&keys, |mut s| {
                let names: Vec<String> = s.iter().map(|(n, _)| n.to_string()).collect();
                for name in names {
                    s.get_or_create(&name)
                        .insert("tampered".into(), serde_json::json!(true));
                }
                Err(CoreError::rejected("abort after mutating"))
            })
            .unwrap_err();

        prop_assert!(matches!(err, CoreError::ValidationRejected { .. }), "unexpected error: {err}");
        let after: Vec<_> = keys.iter().map(|(_, k)| t.document(k)).collect();
        prop_assert_eq!(before, after);
        prop_assert_eq!(t.locks().held_count(), 0);
    }

    #[test]
    fn lock_tokens_are_deduplicated(keys in keyset_strategy(6)) {
        let distinct: HashSet<_> = keys.iter().map(|(_, k)| lock_token(k)).collect();
        prop_assert_eq!(keys.lock_tokens().len(), distinct.len());
    }

    #[test]
    fn committed_key_sets_release_every_token(keys in keyset_strategy(5)) {
        let t = TestCoordinator::new();
        let outcome = t
            .run_with_retry(&keys, |mut s| {
                let names: Vec<String> = s.iter().map(|(n, _)| n.to_string()).collect();
                for name in names {
                    s.get_or_create(&name);
                }
                Ok(MutationOutcome::Commit(s))
            })
            .unwrap();

        prop_assert!(outcome.is_committed());
        prop_assert_eq!(t.locks().held_count(), 0);
        for (_, key) in keys.iter() {
            prop_assert!(t.document(key).is_some());
        }
    }

    #[test]
    fn single_participant_sets_are_valid(key in key_strategy()) {
        prop_assert!(KeySet::single("only", key).validate().is_ok());
    }
}
