//! # Canopy Engine
//!
//! The pure-logic core of a path-addressable document store.
//!
//! This crate turns nested document trees into flat, individually
//! addressable leaf entries and back, and defines the wire format those
//! entries travel in. It performs no IO: the same inputs always produce
//! the same outputs, which keeps every piece testable without mocks.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of files, network, or platform
//! - **Deterministic**: same inputs always produce same outputs
//! - **Canonical**: one string form per path, one byte form per entry
//! - **Portable**: runs anywhere Rust runs (native, WASM, embedded)
//!
//! ## Core Concepts
//!
//! ### Paths
//!
//! Every leaf of a tree is addressed by an [`EntityPath`], a sequence of
//! key and index segments with a canonical bracketed string form such as
//! `['users'][0]['name']`. The encoding is prefix-free, so string prefix
//! checks agree with structural ancestry ([`string_relationship`]).
//!
//! ### Values
//!
//! [`Value`] is a superset of JSON: byte sequences, dates, regular
//! expression patterns, typed numeric arrays and non-finite numbers are
//! first-class, with a lossless extended-JSON text form for each.
//!
//! ### Trees and Entries
//!
//! [`flatten_value`] decomposes a tree into `(path, leaf)` pairs and
//! [`unflatten_value`] folds them back. An [`Entry`] is one such leaf with
//! write metadata attached; a `None` value marks a tombstone.
//!
//! ### Classification
//!
//! [`NodeLookup`] is a trie over the current leaf set. For any path it
//! reports in one walk whether the path is a leaf, sits below one
//! (ancestor match), spans descendant leaves, or touches nothing.
//!
//! ### Wire Format
//!
//! [`serialize_entries`] and [`deserialize_entries`] frame entries in a
//! self-delimiting binary format with optional CRC32C checksums and
//! AES-CBC-128 encryption. [`compact_and_deserialize_entries`] decodes a
//! stream while keeping only the last write per key.
//!
//! ## Quick Start
//!
//! ```rust
//! use canopy_engine::{
//!     flatten_value, object, parse_path, serialize_entries, deserialize_entries,
//!     Entry, MatchType, NodeLookup, Value,
//! };
//!
//! // 1. Build a tree and flatten it into leaves
//! let tree = object! {
//!     "user" => object! {
//!         "name" => Value::from("Alice"),
//!         "age" => Value::from(33),
//!     },
//! };
//! let leaves = flatten_value(&tree);
//! assert_eq!(leaves[0].0.to_string(), "['user']['age']");
//!
//! // 2. Classify paths against the leaf set
//! let mut lookup = NodeLookup::new();
//! for (path, _) in &leaves {
//!     lookup.add(path);
//! }
//! let query = parse_path("['user']").unwrap();
//! assert_eq!(lookup.classify(&query).match_type, MatchType::Descendants);
//!
//! // 3. Serialize leaves as wire entries and read them back
//! let entries: Vec<Entry> = leaves
//!     .into_iter()
//!     .map(|(path, value)| Entry::new(path.to_string(), value))
//!     .collect();
//! let bytes = serialize_entries(&entries, None, true).unwrap();
//! assert_eq!(deserialize_entries(&bytes, None, true).unwrap(), entries);
//! ```

pub mod codec;
pub mod entry;
pub mod error;
pub mod lookup;
pub mod path;
pub mod tree;
pub mod value;

// Re-export main types at crate root
pub use codec::{
    compact_and_deserialize_entries, deserialize_entries, serialize_entries, serialize_entry,
    CipherMethod, EncryptionKey, PayloadEncoding, HEADER_SIZE, HEADER_VERSION,
};
pub use entry::{ConflictInfo, Entry, EntryMetadata, ServerMetadata, Timestamp};
pub use error::{Error, Result};
pub use lookup::{Classification, MatchType, NodeLookup};
pub use path::{
    parse_path, string_relationship, EntityPath, NodePath, PathRelationship, Segment,
};
pub use tree::{
    diff_tree, flatten_value, patch_in_place, patch_value, unflatten_value,
};
pub use value::{ExtendedScalar, NumericArray, Value};
