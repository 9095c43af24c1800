//! Property-based tests across the engine surface.
//!
//! These cross-check the pieces against each other: the path codec against
//! its grammar, flatten against unflatten, the trie against a brute-force
//! classifier, and the wire codec against itself under encryption,
//! checksumming and compaction.

use std::collections::BTreeMap;

use proptest::collection::{btree_map, vec};
use proptest::prelude::*;

use canopy_engine::{
    compact_and_deserialize_entries, deserialize_entries, flatten_value, parse_path,
    serialize_entries, string_relationship, unflatten_value, EncryptionKey, Entry, EntityPath,
    ExtendedScalar, MatchType, NodeLookup, PathRelationship, Segment, Value,
};

fn arb_segment() -> impl Strategy<Value = Segment> {
    prop_oneof![
        // Keys deliberately include quote and bracket characters
        "[a-z'\\]\\[]{0,6}".prop_map(Segment::Key),
        (0u64..200).prop_map(Segment::Index),
    ]
}

fn arb_path() -> impl Strategy<Value = EntityPath> {
    vec(arb_segment(), 0..5).prop_map(EntityPath::new)
}

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        // Finite only: NaN is not equal to itself
        (-1.0e12f64..1.0e12).prop_map(Value::Number),
        "[a-zA-Z0-9 $]{0,8}".prop_map(Value::String),
        vec(any::<u8>(), 0..12).prop_map(Value::Bytes),
        (0i64..4_000_000_000_000).prop_map(|ms| Value::Extended(ExtendedScalar::Date(ms))),
    ]
}

fn arb_value() -> impl Strategy<Value = Value> {
    arb_scalar().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            vec(inner.clone(), 0..4).prop_map(Value::Array),
            btree_map("[a-z]{1,4}", inner, 0..4).prop_map(Value::Object),
        ]
    })
}

fn arb_entry() -> impl Strategy<Value = Entry> {
    (
        arb_path(),
        proptest::option::of(arb_value()),
        1u64..u32::MAX as u64,
    )
        .prop_map(|(path, value, update_time)| {
            let entry = match value {
                Some(value) => Entry::new(path.to_string(), value),
                None => Entry::tombstone(path.to_string()),
            };
            entry.with_update_time(update_time)
        })
}

fn test_key() -> EncryptionKey {
    EncryptionKey::new(*b"sixteen byte key")
}

/// Brute-force reference for [`NodeLookup::classify`].
fn classify_by_scan(leaves: &[EntityPath], query: &EntityPath) -> (MatchType, Vec<EntityPath>) {
    for leaf in leaves {
        match leaf.relationship(query) {
            PathRelationship::Equal => return (MatchType::Leaf, vec![leaf.clone()]),
            PathRelationship::Ancestor => return (MatchType::Ancestor, vec![leaf.clone()]),
            _ => {}
        }
    }
    let mut below: Vec<EntityPath> = leaves
        .iter()
        .filter(|leaf| leaf.relationship(query) == PathRelationship::Descendant)
        .cloned()
        .collect();
    if below.is_empty() && !query.is_empty() {
        return (MatchType::None, Vec::new());
    }
    below.sort();
    (MatchType::Descendants, below)
}

proptest! {
    #[test]
    fn prop_path_string_roundtrip(path in arb_path()) {
        let text = path.to_string();
        prop_assert_eq!(parse_path(&text).unwrap(), path);
    }

    #[test]
    fn prop_path_order_agrees_with_string_order(a in arb_path(), b in arb_path()) {
        prop_assert_eq!(a.cmp(&b), a.to_string().cmp(&b.to_string()));
    }

    #[test]
    fn prop_string_relationship_agrees_with_structural(a in arb_path(), b in arb_path()) {
        prop_assert_eq!(
            string_relationship(&a.to_string(), &b.to_string()),
            a.relationship(&b)
        );
    }

    #[test]
    fn prop_flatten_unflatten_roundtrip(value in arb_value()) {
        let leaves = flatten_value(&value);
        prop_assert_eq!(unflatten_value(leaves), Some(value));
    }

    #[test]
    fn prop_flatten_output_is_disjoint(value in arb_value()) {
        let leaves = flatten_value(&value);
        for (i, (a, _)) in leaves.iter().enumerate() {
            for (b, _) in &leaves[i + 1..] {
                prop_assert_eq!(a.relationship(b), PathRelationship::None);
            }
        }
    }

    #[test]
    fn prop_codec_roundtrip(
        entries in vec(arb_entry(), 0..8),
        encrypt in any::<bool>(),
        checksums in any::<bool>(),
    ) {
        let key = test_key();
        let cipher = encrypt.then_some(&key);
        let bytes = serialize_entries(&entries, cipher, checksums).unwrap();
        let decoded = deserialize_entries(&bytes, cipher, checksums).unwrap();
        prop_assert_eq!(decoded, entries);
    }

    #[test]
    fn prop_compaction_keeps_last_write_per_key(entries in vec(arb_entry(), 0..12)) {
        let bytes = serialize_entries(&entries, None, true).unwrap();
        let compacted = compact_and_deserialize_entries(&bytes, None, true).unwrap();

        // Reference: last write per key, in order of last occurrence.
        let mut last: BTreeMap<String, (usize, Entry)> = BTreeMap::new();
        for (position, entry) in entries.iter().enumerate() {
            last.insert(entry.key.clone(), (position, entry.clone()));
        }
        let mut expected: Vec<(usize, Entry)> = last.into_values().collect();
        expected.sort_by_key(|(position, _)| *position);
        let expected: Vec<Entry> = expected.into_iter().map(|(_, entry)| entry).collect();

        prop_assert_eq!(compacted, expected);
    }

    #[test]
    fn prop_corruption_never_passes_verification(
        entries in vec(arb_entry(), 1..4),
        flip in any::<proptest::sample::Index>(),
    ) {
        let clean = serialize_entries(&entries, None, true).unwrap();
        let mut corrupt = clean.clone();
        let index = flip.index(corrupt.len());
        corrupt[index] ^= 0x01;
        let result = deserialize_entries(&corrupt, None, true);
        prop_assert!(result.is_err() || result.unwrap() != entries);
    }

    #[test]
    fn prop_lookup_matches_brute_force(
        candidates in vec(arb_path(), 0..12),
        queries in vec(arb_path(), 1..8),
    ) {
        // Build an antichain by skipping paths that overlap an accepted one,
        // the same discipline the store enforces on its leaf set.
        let mut leaves: Vec<EntityPath> = Vec::new();
        for path in candidates {
            let overlaps = leaves
                .iter()
                .any(|leaf| leaf.relationship(&path) != PathRelationship::None);
            if !overlaps {
                leaves.push(path);
            }
        }

        let mut lookup = NodeLookup::new();
        lookup.add_many(&leaves);
        prop_assert_eq!(lookup.len(), leaves.len());

        for query in &queries {
            let classification = lookup.classify(query);
            let (expected_type, expected_paths) = classify_by_scan(&leaves, query);
            prop_assert_eq!(classification.match_type, expected_type);
            prop_assert_eq!(classification.paths, expected_paths);
        }

        // Removal keeps the remaining leaves classifiable.
        let mut remaining = leaves.clone();
        while let Some(gone) = remaining.pop() {
            prop_assert!(lookup.remove(&gone));
            for query in &queries {
                let classification = lookup.classify(query);
                let (expected_type, expected_paths) = classify_by_scan(&remaining, query);
                prop_assert_eq!(classification.match_type, expected_type);
                prop_assert_eq!(classification.paths, expected_paths);
            }
        }
        prop_assert!(lookup.is_empty());
    }
}
