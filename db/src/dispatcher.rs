//! The per-database dispatcher task.
//!
//! Every database spawns exactly one dispatcher owning its [`DbCore`].
//! Handles talk to it over an mpsc channel with oneshot replies, which
//! serializes all reads and writes without a lock. When the dispatcher
//! stops, pending and future requests uniformly fail with
//! [`DbError::Closed`](crate::DbError::Closed).

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use canopy_engine::{ConflictInfo, EntityPath, Entry, ServerMetadata, Value};

use crate::core::{last_write_wins, ConflictResolver, DbCore};
use crate::error::{DbError, Result};
use crate::subscription::{ChangeEvent, SubscriptionId, SubscriptionKind};
use crate::transaction::Transaction;
use crate::transport::SyncClient;

pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

pub(crate) enum Command {
    Commit {
        tx: Transaction,
        reply: Reply<Vec<Entry>>,
    },
    Get {
        path: EntityPath,
        reply: Reply<Option<Value>>,
    },
    Keys {
        path: EntityPath,
        reply: Reply<Vec<String>>,
    },
    MergeRemoteBytes {
        bytes: Vec<u8>,
        reply: Reply<Vec<Entry>>,
    },
    FindConflicts {
        base: Option<EntityPath>,
        reply: Reply<Vec<ConflictInfo>>,
    },
    ResolveConflicts {
        resolver: ConflictResolver,
        reply: Reply<Vec<Entry>>,
    },
    Push {
        base: Option<EntityPath>,
        reply: Reply<usize>,
    },
    Pull {
        reply: Reply<Vec<Entry>>,
    },
    RewriteRemote {
        reply: Reply<usize>,
    },
    Destroy {
        reply: Reply<()>,
    },
    Subscribe {
        path: EntityPath,
        kind: SubscriptionKind,
        reply: Reply<(SubscriptionId, mpsc::UnboundedReceiver<ChangeEvent>)>,
    },
    Unsubscribe {
        id: SubscriptionId,
        reply: Reply<bool>,
    },
    ServerMeta {
        reply: Reply<ServerMetadata>,
    },
    Wipe {
        reply: Reply<()>,
    },
}

pub(crate) struct Dispatcher {
    core: DbCore,
    client: Option<Arc<dyn SyncClient>>,
    commands: mpsc::Receiver<Command>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub(crate) fn new(
        core: DbCore,
        client: Option<Arc<dyn SyncClient>>,
        commands: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            core,
            client,
            commands,
            cancel,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }
        tracing::debug!(db = %self.core.name(), "dispatcher stopped");
    }

    async fn handle(&mut self, command: Command) {
        // A dropped reply receiver just means the caller gave up waiting.
        match command {
            Command::Commit { tx, reply } => {
                let _ = reply.send(self.core.commit(tx).await);
            }
            Command::Get { path, reply } => {
                let _ = reply.send(Ok(self.core.get(&path)));
            }
            Command::Keys { path, reply } => {
                let _ = reply.send(Ok(self.core.keys(&path)));
            }
            Command::MergeRemoteBytes { bytes, reply } => {
                let _ = reply.send(self.core.merge_remote_bytes(&bytes).await);
            }
            Command::FindConflicts { base, reply } => {
                let _ = reply.send(self.core.find_conflicts(base.as_ref()));
            }
            Command::ResolveConflicts { resolver, reply } => {
                let _ = reply.send(self.core.resolve_conflicts(None, &resolver).await);
            }
            Command::Push { base, reply } => {
                let _ = reply.send(self.push(base.as_ref()).await);
            }
            Command::Pull { reply } => {
                let _ = reply.send(self.pull().await);
            }
            Command::RewriteRemote { reply } => {
                let _ = reply.send(self.rewrite_remote().await);
            }
            Command::Destroy { reply } => {
                let _ = reply.send(self.destroy().await);
            }
            Command::Subscribe { path, kind, reply } => {
                let _ = reply.send(Ok(self.core.subscribe(path, kind)));
            }
            Command::Unsubscribe { id, reply } => {
                let _ = reply.send(Ok(self.core.unsubscribe(id)));
            }
            Command::ServerMeta { reply } => {
                let _ = reply.send(Ok(self.core.server_metadata()));
            }
            Command::Wipe { reply } => {
                let _ = reply.send(self.core.wipe().await);
            }
        }
    }

    /// Settle outstanding conflicts, then send every pending local
    /// revision (under `base`, when given) and promote it at the returned
    /// commit timestamp.
    async fn push(&mut self, base: Option<&EntityPath>) -> Result<usize> {
        let client = self.client.clone().ok_or(DbError::NoSyncClient)?;
        self.core.resolve_conflicts(base, &last_write_wins()).await?;
        let pending = self.core.pending_entries(base);
        if pending.is_empty() {
            return Ok(0);
        }
        let bytes = self.core.encode_entries(&pending)?;
        let response = client.write(self.core.name(), bytes).await?;
        let keys: Vec<String> = pending.into_iter().map(|entry| entry.key).collect();
        self.core
            .promote_pushed(&keys, response.commit_timestamp)
            .await?;
        tracing::debug!(
            db = %self.core.name(),
            entries = keys.len(),
            commit_timestamp = response.commit_timestamp,
            "pushed local revisions"
        );
        Ok(keys.len())
    }

    /// Replace the remote datastore with the current effective tree,
    /// purging tombstoned history on both sides.
    async fn rewrite_remote(&mut self) -> Result<usize> {
        let client = self.client.clone().ok_or(DbError::NoSyncClient)?;
        self.core.resolve_conflicts(None, &last_write_wins()).await?;
        let entries = self.core.effective_entries();
        let count = entries.len();
        let bytes = self.core.encode_entries(&entries)?;
        let response = client.rewrite(self.core.name(), bytes).await?;
        self.core
            .apply_local_rewrite(entries, response.commit_timestamp)
            .await?;
        tracing::info!(
            db = %self.core.name(),
            entries = count,
            commit_timestamp = response.commit_timestamp,
            "rewrote remote datastore"
        );
        Ok(count)
    }

    /// Delete the remote datastore, then all local state.
    async fn destroy(&mut self) -> Result<()> {
        if let Some(client) = self.client.clone() {
            client.destroy(self.core.name()).await?;
        }
        self.core.wipe().await
    }

    /// Fetch everything committed after the sync cursor and merge it.
    async fn pull(&mut self) -> Result<Vec<Entry>> {
        let client = self.client.clone().ok_or(DbError::NoSyncClient)?;
        let since = self.core.server_metadata().last_modified;
        let bytes = client.read(self.core.name(), since, false).await?;
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        self.core.merge_remote_bytes(&bytes).await
    }
}
