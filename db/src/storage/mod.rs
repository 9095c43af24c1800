//! Pluggable persistence.
//!
//! The database does not talk to disk itself; it drives a [`StorageAdapter`]
//! holding three key/value stores of JSON records. Adapters only move opaque
//! records around, so implementations stay small: the reference
//! [`MemoryAdapter`] is a map behind a mutex.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use canopy_engine::{Entry, ServerMetadata, Timestamp, Value};

use crate::error::{DbError, Result};

mod memory;

pub use memory::MemoryAdapter;

/// The three stores every adapter provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreName {
    /// Local writes not yet accepted by the remote
    LocalRevisions,
    /// The last known remote state
    RemoteRevisions,
    /// Singleton metadata records (sync cursor)
    GlobalMetadata,
}

impl StoreName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreName::LocalRevisions => "local_revisions",
            StoreName::RemoteRevisions => "remote_revisions",
            StoreName::GlobalMetadata => "global_metadata",
        }
    }
}

/// One write in an atomic batch. `record: None` deletes the key.
#[derive(Debug, Clone)]
pub struct BatchOp {
    pub store: StoreName,
    pub key: String,
    pub record: Option<serde_json::Value>,
}

impl BatchOp {
    pub fn put(store: StoreName, key: impl Into<String>, record: serde_json::Value) -> Self {
        Self {
            store,
            key: key.into(),
            record: Some(record),
        }
    }

    pub fn delete(store: StoreName, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            record: None,
        }
    }
}

/// Backing storage for one named database.
///
/// All methods take `&self`; adapters handle their own interior locking.
/// [`apply_batch`](StorageAdapter::apply_batch) must be atomic: either every
/// op lands or none do.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn get(&self, store: StoreName, key: &str) -> Result<Option<serde_json::Value>>;

    async fn put(&self, store: StoreName, key: &str, record: serde_json::Value) -> Result<()>;

    async fn delete(&self, store: StoreName, key: &str) -> Result<()>;

    /// All keys of a store, in ascending order.
    async fn keys(&self, store: StoreName) -> Result<Vec<String>>;

    /// All `(key, record)` pairs of a store, in ascending key order.
    async fn entries(&self, store: StoreName) -> Result<Vec<(String, serde_json::Value)>>;

    async fn apply_batch(&self, batch: Vec<BatchOp>) -> Result<()>;

    /// Drop every record of a store.
    async fn clear(&self, store: StoreName) -> Result<()>;
}

/// Key of the singleton sync-cursor record in [`StoreName::GlobalMetadata`].
pub const SERVER_METADATA_KEY: &str = "server";

/// A locally written revision, shadowing the remote value for its key until
/// the write is accepted (or reverted) by the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRecord {
    /// The written value; `None` marks a local deletion
    pub value: Option<Value>,
    /// When the write happened
    pub update_time: Timestamp,
    /// The remote commit timestamp this write was based on, used to detect
    /// conflicting remote changes that landed afterwards
    pub reference_sync_timestamp: Timestamp,
}

/// The last known remotely committed revision for one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    /// The committed value; `None` marks a remote deletion
    pub value: Option<Value>,
    /// When the writing client wrote the entry
    pub update_time: Timestamp,
    /// When the server committed the entry
    pub commit_time: Timestamp,
}

impl RemoteRecord {
    /// Build the record for a merged remote entry.
    pub fn from_entry(entry: &Entry) -> Self {
        Self {
            value: entry.value.clone(),
            update_time: entry.metadata.update_time,
            commit_time: entry.metadata.commit_time.unwrap_or(0),
        }
    }
}

pub(crate) fn encode_record<T: Serialize>(record: &T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(record)?)
}

pub(crate) fn decode_record<T: for<'de> Deserialize<'de>>(
    store: StoreName,
    key: &str,
    record: serde_json::Value,
) -> Result<T> {
    serde_json::from_value(record)
        .map_err(|e| DbError::Storage(format!("bad {} record for {key}: {e}", store.as_str())))
}

pub(crate) async fn load_server_metadata(
    adapter: &dyn StorageAdapter,
) -> Result<ServerMetadata> {
    match adapter
        .get(StoreName::GlobalMetadata, SERVER_METADATA_KEY)
        .await?
    {
        Some(record) => decode_record(StoreName::GlobalMetadata, SERVER_METADATA_KEY, record),
        None => Ok(ServerMetadata::default()),
    }
}
