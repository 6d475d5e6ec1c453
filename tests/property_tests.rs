//! Property-based tests for the OrionDB engine invariants.

use oriondb::{Config, Database, Metadata, MetadataValue};
use proptest::prelude::*;
use tempfile::tempdir;

const DIM: usize = 8;

fn arb_vector() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-1.0f32..1.0f32, DIM)
}

fn arb_tag() -> impl Strategy<Value = String> {
    "[a-c]{1,2}".prop_map(|s| s)
}

fn open_db(path: &std::path::Path) -> Database {
    Database::create(path, Config::new(DIM as u32, 64).unwrap()).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    /// Inserting then retrieving a vector returns the exact payload.
    #[test]
    fn prop_add_get_roundtrip(id in 0u64..10_000, vector in arb_vector()) {
        let dir = tempdir().unwrap();
        let db = open_db(&dir.path().join("db.orion"));

        prop_assert!(db.add(id, &vector, Metadata::new()));
        let (retrieved, _) = db.get(id).unwrap();
        prop_assert_eq!(retrieved, vector);
    }

    /// A query returns at most k results and never more than the live count.
    #[test]
    fn prop_query_returns_at_most_k(
        vectors in prop::collection::vec(arb_vector(), 1..40),
        k in 1usize..20,
    ) {
        let dir = tempdir().unwrap();
        let db = open_db(&dir.path().join("db.orion"));

        for (i, v) in vectors.iter().enumerate() {
            prop_assert!(db.add(i as u64, v, Metadata::new()));
        }

        let results = db.query(&vectors[0], k);
        prop_assert!(results.len() <= k);
        prop_assert!(results.len() <= vectors.len());
        for pair in results.windows(2) {
            prop_assert!(pair[0].distance <= pair[1].distance);
        }
    }

    /// count() always equals the number of live ids after adds and removes.
    #[test]
    fn prop_count_tracks_live_ids(
        ops in prop::collection::vec((0u64..30, prop::bool::ANY), 1..60),
    ) {
        let dir = tempdir().unwrap();
        let db = open_db(&dir.path().join("db.orion"));
        let mut live = std::collections::BTreeSet::new();

        for (id, is_add) in ops {
            if is_add {
                prop_assert!(db.add(id, &[0.5f32; DIM], Metadata::new()));
                live.insert(id);
            } else {
                let removed = db.remove(id);
                prop_assert_eq!(removed, live.remove(&id));
            }
            prop_assert_eq!(db.count(), live.len());
        }

        for id in 0u64..30 {
            prop_assert_eq!(db.get(id).is_some(), live.contains(&id));
        }
    }

    /// Adding a clause to a filter can only shrink the result set.
    #[test]
    fn prop_filter_monotonicity(
        vectors in prop::collection::vec(arb_vector(), 5..30),
        tags in prop::collection::vec(arb_tag(), 5..30),
        query in arb_vector(),
    ) {
        let dir = tempdir().unwrap();
        let db = open_db(&dir.path().join("db.orion"));

        let n = vectors.len().min(tags.len());
        for i in 0..n {
            let mut meta = Metadata::new();
            meta.insert("tag".to_string(), MetadataValue::from(tags[i].clone()));
            meta.insert("half".to_string(), MetadataValue::Int(i64::from(i < n / 2)));
            prop_assert!(db.add(i as u64, &vectors[i], meta));
        }

        let mut loose = Metadata::new();
        loose.insert("tag".to_string(), MetadataValue::from(tags[0].clone()));
        let mut tight = loose.clone();
        tight.insert("half".to_string(), MetadataValue::Int(1));

        let loose_hits = db.query_with_filter(&query, n, &loose);
        let tight_hits = db.query_with_filter(&query, n, &tight);
        prop_assert!(tight_hits.len() <= loose_hits.len());
    }

    /// Save then load preserves every record and the live count.
    #[test]
    fn prop_save_load_preserves_state(
        entries in prop::collection::btree_map(0u64..50, arb_vector(), 1..30),
    ) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.orion");

        let db = open_db(&path);
        for (id, vector) in &entries {
            let mut meta = Metadata::new();
            meta.insert("id".to_string(), MetadataValue::Int(*id as i64));
            prop_assert!(db.add(*id, vector, meta));
        }
        db.save().unwrap();

        let reloaded = Database::load(&path).unwrap();
        prop_assert_eq!(reloaded.count(), entries.len());
        for (id, vector) in &entries {
            let (got, meta) = reloaded.get(*id).unwrap();
            prop_assert_eq!(&got, vector);
            prop_assert_eq!(meta.get("id"), Some(&MetadataValue::Int(*id as i64)));
        }
    }
}
