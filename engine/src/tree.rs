//! Tree flatten/unflatten, patching and diffing.
//!
//! These are the conversions between nested [`Value`] trees and flat leaf
//! entries. Flattening descends depth-first; empty containers flatten to a
//! single leaf holding the empty container itself, so empty branches stay
//! representable. Unflattening folds leaves back through sequential
//! structural patching.

use std::collections::BTreeMap;

use crate::entry::Entry;
use crate::path::{EntityPath, Segment};
use crate::value::Value;

/// Flatten a tree into `(path, leaf value)` pairs in depth-first order.
///
/// Object children are visited in key order, array children in index
/// order. The resulting paths are pairwise disjoint.
pub fn flatten_value(value: &Value) -> Vec<(EntityPath, Value)> {
    let mut leaves = Vec::new();
    flatten_into(&EntityPath::root(), value, &mut leaves);
    leaves
}

fn flatten_into(prefix: &EntityPath, value: &Value, leaves: &mut Vec<(EntityPath, Value)>) {
    match value {
        Value::Array(items) if !items.is_empty() => {
            for (index, item) in items.iter().enumerate() {
                flatten_into(&prefix.child(Segment::Index(index as u64)), item, leaves);
            }
        }
        Value::Object(entries) if !entries.is_empty() => {
            for (key, item) in entries {
                flatten_into(&prefix.child(Segment::Key(key.clone())), item, leaves);
            }
        }
        leaf => leaves.push((prefix.clone(), leaf.clone())),
    }
}

/// Rebuild a tree from leaves by sequential structural patching.
///
/// Returns `None` for an empty leaf list.
pub fn unflatten_value(leaves: impl IntoIterator<Item = (EntityPath, Value)>) -> Option<Value> {
    let mut root = None;
    for (path, value) in leaves {
        root = Some(patch_value(root, path.segments(), value));
    }
    root
}

/// Write `value` at `path` inside `root`, creating intermediate containers
/// on demand: a key segment materializes an object, an index segment an
/// array (null-padded up to the index). Non-container values encountered
/// along the way are overwritten. Only the containers along `path` are
/// rebuilt; subtrees off that spine are moved, never cloned.
pub fn patch_value(root: Option<Value>, path: &[Segment], value: Value) -> Value {
    match path.split_first() {
        None => value,
        Some((Segment::Key(key), rest)) => {
            let mut entries = match root {
                Some(Value::Object(entries)) => entries,
                _ => BTreeMap::new(),
            };
            let child = entries.remove(key);
            entries.insert(key.clone(), patch_value(child, rest, value));
            Value::Object(entries)
        }
        Some((Segment::Index(index), rest)) => {
            let mut items = match root {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };
            let index = *index as usize;
            while items.len() <= index {
                items.push(Value::Null);
            }
            let child = std::mem::replace(&mut items[index], Value::Null);
            items[index] = patch_value(Some(child), rest, value);
            Value::Array(items)
        }
    }
}

/// In-place variant of [`patch_value`].
pub fn patch_in_place(root: &mut Value, path: &[Segment], value: Value) {
    let current = std::mem::replace(root, Value::Null);
    *root = patch_value(Some(current), path, value);
}

/// Diff two trees at the leaf level.
///
/// Emits a tombstone for every leaf key present in `source` but absent in
/// `dest`, and an entry for every leaf in `dest` that is new or whose value
/// differs structurally from `source`. Output is sorted by key; metadata is
/// left for the caller to stamp.
pub fn diff_tree(source: Option<&Value>, dest: Option<&Value>) -> Vec<Entry> {
    let source_leaves = leaf_map(source);
    let dest_leaves = leaf_map(dest);

    let mut entries = Vec::new();
    for key in source_leaves.keys() {
        if !dest_leaves.contains_key(key) {
            entries.push(Entry::tombstone(key.clone()));
        }
    }
    for (key, (_, dest_value)) in &dest_leaves {
        match source_leaves.get(key) {
            Some((_, source_value)) if source_value == dest_value => {}
            _ => entries.push(Entry::new(key.clone(), dest_value.clone())),
        }
    }
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    entries
}

fn leaf_map(value: Option<&Value>) -> BTreeMap<String, (EntityPath, Value)> {
    value
        .map(flatten_value)
        .unwrap_or_default()
        .into_iter()
        .map(|(path, leaf)| (path.to_string(), (path, leaf)))
        .collect()
}
