//! Property-Based Tests for the Shared Store
//!
//! Uses proptest to check the region-backed map against a plain HashMap
//! model. Each case gets its own uniquely named region, removed on drop.

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::StoreError;
use crate::shared::{remove_region, SharedStore};

const CASE_CAPACITY: u64 = 256 * 1024;

fn unique_name(tag: &str) -> String {
    static N: AtomicU32 = AtomicU32::new(0);
    format!(
        "prop-{tag}-{}-{}",
        std::process::id(),
        N.fetch_add(1, Ordering::Relaxed)
    )
}

/// Removes the region when a case ends, pass or fail.
struct Scoped(String);

impl Drop for Scoped {
    fn drop(&mut self) {
        let _ = remove_region(&self.0);
    }
}

// == Strategies ==
/// Small alphabet so updates, erases and collisions are common.
fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(0u8..5, 1..5)
}

fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..64)
}

/// Generates a sequence of store operations for testing
#[derive(Debug, Clone)]
enum StoreOp {
    Set { key: Vec<u8>, value: Vec<u8> },
    Get { key: Vec<u8> },
    Erase { key: Vec<u8> },
    Clear,
}

fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        4 => (key_strategy(), value_strategy())
            .prop_map(|(key, value)| StoreOp::Set { key, value }),
        3 => key_strategy().prop_map(|key| StoreOp::Get { key }),
        2 => key_strategy().prop_map(|key| StoreOp::Erase { key }),
        1 => Just(StoreOp::Clear),
    ]
}

proptest! {
    // Regions are file-backed, keep the case count moderate
    #![proptest_config(ProptestConfig::with_cases(32))]

    // Any operation sequence leaves the store agreeing with a HashMap model
    // on every lookup, the entry count, and the set of values reachable by
    // positional iteration.
    #[test]
    fn prop_store_matches_model(ops in prop::collection::vec(store_op_strategy(), 1..60)) {
        let name = unique_name("model");
        let _ = remove_region(&name);
        let _scoped = Scoped(name.clone());

        let mut store = SharedStore::open_or_create(&name, CASE_CAPACITY).unwrap();
        let mut model: HashMap<Vec<u8>, Vec<u8>> = HashMap::new();

        for op in ops {
            match op {
                StoreOp::Set { key, value } => {
                    store.set(&key, &value).unwrap();
                    model.insert(key, value);
                }
                StoreOp::Get { key } => match (store.get(&key), model.get(&key)) {
                    (Ok(got), Some(want)) => prop_assert_eq!(&got, want),
                    (Err(StoreError::NotFound), None) => {}
                    (got, want) => {
                        return Err(TestCaseError::fail(format!(
                            "get diverged: store={got:?} model={want:?}"
                        )));
                    }
                },
                StoreOp::Erase { key } => {
                    store.erase(&key).unwrap();
                    model.remove(&key);
                }
                StoreOp::Clear => {
                    store.clear().unwrap();
                    model.clear();
                }
            }
            prop_assert_eq!(store.len().unwrap(), model.len());
        }

        // Positional iteration covers exactly the model's values
        let mut seen: Vec<Vec<u8>> = (0..model.len())
            .map(|i| store.iterate(i).unwrap())
            .collect();
        let mut expected: Vec<Vec<u8>> = model.values().cloned().collect();
        seen.sort();
        expected.sort();
        prop_assert_eq!(seen, expected);
        prop_assert!(matches!(
            store.iterate(model.len()),
            Err(StoreError::EndOfSequence(_))
        ));
    }

    // set(k, v1); set(k, v2); get(k) == v2 — an update fully replaces.
    #[test]
    fn prop_update_replaces(
        key in key_strategy(),
        value1 in value_strategy(),
        value2 in value_strategy(),
    ) {
        let name = unique_name("update");
        let _ = remove_region(&name);
        let _scoped = Scoped(name.clone());

        let mut store = SharedStore::open_or_create(&name, CASE_CAPACITY).unwrap();
        store.set(&key, &value1).unwrap();
        store.set(&key, &value2).unwrap();
        prop_assert_eq!(store.get(&key).unwrap(), value2);
        prop_assert_eq!(store.len().unwrap(), 1);
    }

    // Free-space accounting returns to its starting point once everything
    // written has been erased again.
    #[test]
    fn prop_free_bytes_restored(
        entries in prop::collection::hash_map(key_strategy(), value_strategy(), 1..20),
    ) {
        let name = unique_name("free");
        let _ = remove_region(&name);
        let _scoped = Scoped(name.clone());

        let mut store = SharedStore::open_or_create(&name, CASE_CAPACITY).unwrap();
        let fresh = store.free().unwrap();

        for (key, value) in &entries {
            store.set(key, value).unwrap();
        }
        prop_assert!(store.free().unwrap() < fresh);

        for key in entries.keys() {
            store.erase(key).unwrap();
        }
        prop_assert_eq!(store.free().unwrap(), fresh);
        prop_assert!(store.is_empty().unwrap());
    }
}
