//! The public database handle.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use canopy_engine::{ConflictInfo, EntityPath, Entry, ServerMetadata, Value};

use crate::config::DatabaseConfig;
use crate::core::{ConflictResolver, DbCore};
use crate::dispatcher::{Command, Dispatcher, Reply};
use crate::error::{DbError, Result};
use crate::storage::StorageAdapter;
use crate::subscription::{ChangeEvent, SubscriptionId, SubscriptionKind};
use crate::sync;
use crate::transaction::Transaction;

struct Inner {
    name: String,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
}

/// A handle to one open database.
///
/// Cheap to clone; all clones drive the same dispatcher task. Dropping the
/// last handle or calling [`close`](Database::close) stops the dispatcher
/// and any sync loop, and every in-flight request fails with
/// [`DbError::Closed`].
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl Database {
    /// Load state from `adapter` and start the dispatcher (and, when
    /// configured, the sync loop).
    pub async fn open(
        name: impl Into<String>,
        adapter: Arc<dyn StorageAdapter>,
        config: DatabaseConfig,
    ) -> Result<Self> {
        let name = name.into();
        let sync_config = config.sync.clone();
        let client = sync_config.as_ref().map(|sync| sync.client.clone());
        let core = DbCore::load(name.clone(), adapter, config).await?;

        let (commands, receiver) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        tokio::spawn(Dispatcher::new(core, client, receiver, cancel.clone()).run());

        let db = Self {
            inner: Arc::new(Inner {
                name,
                commands,
                cancel,
            }),
        };
        if let Some(sync_config) = sync_config {
            sync::spawn(db.clone(), sync_config);
        }
        tracing::info!(db = %db.inner.name, "database opened");
        Ok(db)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Stop the dispatcher and the sync loop.
    pub fn close(&self) {
        self.inner.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled() || self.inner.commands.is_closed()
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        if self.inner.cancel.is_cancelled() {
            return Err(DbError::Closed);
        }
        let (reply, receiver) = oneshot::channel();
        self.inner
            .commands
            .send(make(reply))
            .await
            .map_err(|_| DbError::Closed)?;
        receiver.await.map_err(|_| DbError::Closed)?
    }

    // ---- reads -------------------------------------------------------

    /// The value visible at `path`, assembled across local and remote
    /// revisions.
    pub async fn get(&self, path: impl Into<EntityPath>) -> Result<Option<Value>> {
        let path = path.into();
        self.request(|reply| Command::Get { path, reply }).await
    }

    /// Effective leaf keys at or below `path`.
    pub async fn keys(&self, path: impl Into<EntityPath>) -> Result<Vec<String>> {
        let path = path.into();
        self.request(|reply| Command::Keys { path, reply }).await
    }

    // ---- writes ------------------------------------------------------

    /// Apply a transaction atomically. Returns the leaf entries whose
    /// effective value changed.
    pub async fn commit(&self, tx: Transaction) -> Result<Vec<Entry>> {
        self.request(|reply| Command::Commit { tx, reply }).await
    }

    /// Single-operation convenience for [`commit`](Database::commit).
    pub async fn put(
        &self,
        path: impl Into<EntityPath>,
        value: impl Into<Value>,
    ) -> Result<Vec<Entry>> {
        self.commit(Transaction::new().put(path, value)).await
    }

    /// Single-operation convenience for [`commit`](Database::commit).
    pub async fn update(
        &self,
        path: impl Into<EntityPath>,
        value: impl Into<Value>,
    ) -> Result<Vec<Entry>> {
        self.commit(Transaction::new().update(path, value)).await
    }

    /// Single-operation convenience for [`commit`](Database::commit).
    pub async fn delete(&self, path: impl Into<EntityPath>) -> Result<Vec<Entry>> {
        self.commit(Transaction::new().delete(path)).await
    }

    // ---- subscriptions -----------------------------------------------

    /// Receive the changed leaf entries for every write touching `path`.
    pub async fn subscribe(
        &self,
        path: impl Into<EntityPath>,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<ChangeEvent>)> {
        let path = path.into();
        self.request(|reply| Command::Subscribe {
            path,
            kind: SubscriptionKind::Diff,
            reply,
        })
        .await
    }

    /// Receive the current value at `path` now and after every change.
    pub async fn observe(
        &self,
        path: impl Into<EntityPath>,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<ChangeEvent>)> {
        let path = path.into();
        self.request(|reply| Command::Subscribe {
            path,
            kind: SubscriptionKind::Snapshot,
            reply,
        })
        .await
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<bool> {
        self.request(|reply| Command::Unsubscribe { id, reply })
            .await
    }

    // ---- sync --------------------------------------------------------

    /// Keys with a local revision that a newer remote commit contradicts.
    pub async fn find_conflicts(
        &self,
        base: Option<EntityPath>,
    ) -> Result<Vec<ConflictInfo>> {
        self.request(|reply| Command::FindConflicts { base, reply })
            .await
    }

    /// Settle every outstanding conflict through `resolver`.
    pub async fn resolve_conflicts(&self, resolver: ConflictResolver) -> Result<Vec<Entry>> {
        self.request(|reply| Command::ResolveConflicts { resolver, reply })
            .await
    }

    /// Push every pending local revision to the remote. Returns how many
    /// entries were accepted.
    pub async fn push(&self) -> Result<usize> {
        self.request(|reply| Command::Push { base: None, reply })
            .await
    }

    /// Push only the pending local revisions overlapping `base`.
    pub async fn push_at(&self, base: impl Into<EntityPath>) -> Result<usize> {
        let base = Some(base.into());
        self.request(|reply| Command::Push { base, reply }).await
    }

    /// Fetch and merge remote commits past the sync cursor. Returns the
    /// entries whose effective value changed.
    pub async fn pull(&self) -> Result<Vec<Entry>> {
        self.request(|reply| Command::Pull { reply }).await
    }

    /// Replace the remote datastore with the current effective tree,
    /// purging tombstoned history on both sides. Returns how many entries
    /// the rewritten datastore holds.
    pub async fn rewrite_remote(&self) -> Result<usize> {
        self.request(|reply| Command::RewriteRemote { reply }).await
    }

    /// Delete the remote datastore (when one is configured), then all
    /// local state.
    pub async fn destroy(&self) -> Result<()> {
        self.request(|reply| Command::Destroy { reply }).await
    }

    /// Merge a batch of remote entry bytes delivered out of band.
    pub(crate) async fn apply_remote_bytes(&self, bytes: Vec<u8>) -> Result<Vec<Entry>> {
        self.request(|reply| Command::MergeRemoteBytes { bytes, reply })
            .await
    }

    /// The current sync cursor.
    pub async fn server_metadata(&self) -> Result<ServerMetadata> {
        self.request(|reply| Command::ServerMeta { reply }).await
    }

    /// Drop all persisted state of this database.
    pub async fn wipe(&self) -> Result<()> {
        self.request(|reply| Command::Wipe { reply }).await
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.inner.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}
