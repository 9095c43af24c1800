//! Leaf entry types.
//!
//! An [`Entry`] is one flat leaf of the value tree: a canonical path-string
//! key, an optional value (absent = tombstone) and write metadata. Entries
//! are what the store persists, diffs, serializes and synchronizes.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::path::EntityPath;
use crate::value::Value;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Metadata attached to an entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    /// When the entry was last written
    pub update_time: Timestamp,
    /// Remote commit timestamp, once the server has accepted the entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_time: Option<Timestamp>,
    /// Marks a datastore creation/rewrite entry
    #[serde(default)]
    pub is_head_entry: bool,
}

/// One flat leaf of the tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Canonical path-string key
    pub key: String,
    /// Leaf value; `None` marks a tombstone
    pub value: Option<Value>,
    /// Write metadata
    pub metadata: EntryMetadata,
}

impl Entry {
    /// Create an entry holding a value.
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            metadata: EntryMetadata::default(),
        }
    }

    /// Create a tombstone entry.
    pub fn tombstone(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            metadata: EntryMetadata::default(),
        }
    }

    /// Create a head (datastore creation/rewrite) entry.
    pub fn head(commit_time: Timestamp) -> Self {
        Self {
            key: String::new(),
            value: None,
            metadata: EntryMetadata {
                update_time: commit_time,
                commit_time: Some(commit_time),
                is_head_entry: true,
            },
        }
    }

    /// Set the update time, builder style.
    pub fn with_update_time(mut self, update_time: Timestamp) -> Self {
        self.metadata.update_time = update_time;
        self
    }

    /// Whether this entry marks a deletion.
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Parse the entry key back into a path.
    pub fn path(&self) -> Result<EntityPath> {
        self.key.parse()
    }
}

/// A detected local/remote conflict on one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictInfo {
    /// Canonical path-string key
    pub key: String,
    /// The parsed path
    pub path: EntityPath,
    /// The locally written value (`None` = local tombstone)
    pub local_value: Option<Value>,
    /// The remotely committed value (`None` = remote tombstone)
    pub remote_value: Option<Value>,
    /// When the local entry was written
    pub local_update_time: Timestamp,
    /// When the remote entry was written
    pub remote_update_time: Timestamp,
    /// When the server committed the remote entry
    pub remote_commit_time: Timestamp,
}

/// Last-seen remote state, used as the sync cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMetadata {
    /// Commit timestamp of the newest merged remote entry
    pub last_modified: Timestamp,
    /// Commit timestamp of the newest observed datastore rewrite
    pub last_rewritten: Timestamp,
}
