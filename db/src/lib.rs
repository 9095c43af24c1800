//! # Canopy DB
//!
//! A local-first, path-addressable document database built on
//! [`canopy_engine`].
//!
//! Every database is a tree of values whose leaves are individually
//! addressable by [`EntityPath`]. Writes land in a local revision store
//! immediately and are pushed to a remote datastore in the background;
//! remote commits are pulled, merged, and surfaced to subscribers. Reads
//! always resolve against the effective tree: local revisions first,
//! last known remote state underneath.
//!
//! ## Architecture
//!
//! - One [`Database`] = one dispatcher task owning all state. Handles are
//!   cheap clones that talk to it over a channel, so every read and write
//!   is serialized without locks.
//! - Persistence goes through a pluggable [`StorageAdapter`];
//!   [`MemoryAdapter`] is the in-process reference implementation.
//! - The remote side is a [`SyncClient`] moving opaque, optionally
//!   encrypted entry bytes. Background sync polls or streams, with
//!   exponential backoff on network errors.
//! - Concurrent remote edits become [`ConflictInfo`]s, settled by a
//!   [`ConflictResolver`] (last write wins by default).
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use canopy_db::{Database, DatabaseConfig, MemoryAdapter, Transaction};
//! use canopy_engine::{object, EntityPath, Value};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), canopy_db::DbError> {
//! let db = Database::open(
//!     "notes",
//!     Arc::new(MemoryAdapter::new()),
//!     DatabaseConfig::new(),
//! )
//! .await?;
//!
//! let path: EntityPath = "['note-1']".parse()?;
//! db.put(
//!     path,
//!     object! { "title" => Value::from("groceries"), "done" => Value::from(false) },
//! )
//! .await?;
//!
//! let title: EntityPath = "['note-1']['title']".parse()?;
//! assert_eq!(db.get(title).await?, Some(Value::from("groceries")));
//!
//! db.close();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod registry;
pub mod storage;
pub mod subscription;
pub mod transaction;
pub mod transport;

mod core;
mod database;
mod dispatcher;
mod sync;

pub use config::{DatabaseConfig, SyncConfig, SyncMode};
pub use core::{last_write_wins, ConflictResolver};
pub use database::Database;
pub use error::{DbError, Result};
pub use registry::Registry;
pub use storage::{BatchOp, LocalRecord, MemoryAdapter, RemoteRecord, StorageAdapter, StoreName};
pub use subscription::{ChangeEvent, SubscriptionId, SubscriptionKind};
pub use transaction::{Transaction, TransactionOperation};
pub use transport::{EntryStream, SyncClient, WriteResponse};

// Engine types that surface directly in this crate's API.
pub use canopy_engine::{ConflictInfo, EntityPath, Entry, ServerMetadata, Timestamp, Value};
