//! The single-writer database state machine.
//!
//! [`DbCore`] owns everything one database knows: the local and remote
//! revision caches, the effective-leaf lookup, the sync cursor and the live
//! subscriptions. It is driven exclusively by the dispatcher task, so no
//! method takes a lock; the adapter is only consulted for persistence and
//! during [`DbCore::load`].
//!
//! The effective value of a key is the local revision when one exists
//! (including local tombstones, which shadow the remote value) and the last
//! merged remote revision otherwise.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::BoxFuture;

use canopy_engine::{
    compact_and_deserialize_entries, diff_tree, flatten_value, patch_in_place, patch_value,
    serialize_entries, string_relationship, ConflictInfo, EntityPath, Entry, MatchType,
    NodeLookup, PathRelationship, ServerMetadata, Timestamp, Value,
};

use crate::config::DatabaseConfig;
use crate::error::{DbError, Result};
use crate::storage::{
    decode_record, encode_record, load_server_metadata, BatchOp, LocalRecord, RemoteRecord,
    StorageAdapter, StoreName, SERVER_METADATA_KEY,
};
use crate::subscription::{
    ChangeEvent, SubscriptionId, SubscriptionKind, SubscriptionSet,
};
use crate::transaction::{Transaction, TransactionOperation};

/// Picks the value to keep for a conflicted key; `None` keeps a deletion.
pub type ConflictResolver =
    Arc<dyn Fn(ConflictInfo) -> BoxFuture<'static, Option<Value>> + Send + Sync>;

/// The built-in resolver: the side written later wins, local on ties.
pub fn last_write_wins() -> ConflictResolver {
    Arc::new(|conflict| {
        Box::pin(async move {
            if conflict.remote_update_time > conflict.local_update_time {
                conflict.remote_value
            } else {
                conflict.local_value
            }
        })
    })
}

pub(crate) fn now_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Values staged by an uncommitted transaction, keyed by canonical path
/// string. `None` stages a deletion.
type Staged = BTreeMap<String, Option<Value>>;

pub(crate) struct DbCore {
    name: String,
    adapter: Arc<dyn StorageAdapter>,
    config: DatabaseConfig,
    local: BTreeMap<String, LocalRecord>,
    remote: BTreeMap<String, RemoteRecord>,
    lookup: NodeLookup,
    subscriptions: SubscriptionSet,
    server_meta: ServerMetadata,
}

impl DbCore {
    /// Load all revisions and the sync cursor from the adapter.
    pub async fn load(
        name: String,
        adapter: Arc<dyn StorageAdapter>,
        config: DatabaseConfig,
    ) -> Result<Self> {
        let mut local = BTreeMap::new();
        for (key, record) in adapter.entries(StoreName::LocalRevisions).await? {
            let record: LocalRecord = decode_record(StoreName::LocalRevisions, &key, record)?;
            local.insert(key, record);
        }
        let mut remote = BTreeMap::new();
        for (key, record) in adapter.entries(StoreName::RemoteRevisions).await? {
            let record: RemoteRecord = decode_record(StoreName::RemoteRevisions, &key, record)?;
            remote.insert(key, record);
        }
        let server_meta = load_server_metadata(adapter.as_ref()).await?;

        let mut lookup = NodeLookup::new();
        for (key, record) in &local {
            if record.value.is_some() {
                lookup.add(&key.parse()?);
            }
        }
        for (key, record) in &remote {
            if record.value.is_some() && !shadowed(&local, key) {
                lookup.add(&key.parse()?);
            }
        }

        Ok(Self {
            name,
            adapter,
            config,
            local,
            remote,
            lookup,
            subscriptions: SubscriptionSet::new(),
            server_meta,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server_metadata(&self) -> ServerMetadata {
        self.server_meta
    }

    // ---- reads -------------------------------------------------------

    /// Resolve the value visible at `path`.
    pub fn get(&self, path: &EntityPath) -> Option<Value> {
        self.value_at(&self.lookup, None, path)
    }

    /// Effective leaf keys at or below `path`, ascending.
    pub fn keys(&self, path: &EntityPath) -> Vec<String> {
        let classification = self.lookup.classify(path);
        match classification.match_type {
            MatchType::Leaf | MatchType::Descendants => classification
                .paths
                .iter()
                .map(|leaf| leaf.to_string())
                .collect(),
            MatchType::Ancestor | MatchType::None => Vec::new(),
        }
    }

    fn value_at(
        &self,
        lookup: &NodeLookup,
        staged: Option<&Staged>,
        path: &EntityPath,
    ) -> Option<Value> {
        let classification = lookup.classify(path);
        match classification.match_type {
            MatchType::None => None,
            MatchType::Leaf => self.key_value(staged, &path.to_string()),
            MatchType::Ancestor => {
                let leaf = &classification.paths[0];
                let value = self.key_value(staged, &leaf.to_string())?;
                let relative = path.strip_prefix(leaf)?;
                value.index_path(relative).cloned()
            }
            MatchType::Descendants => {
                let mut root = None;
                for leaf in &classification.paths {
                    let Some(value) = self.key_value(staged, &leaf.to_string()) else {
                        continue;
                    };
                    let Some(relative) = leaf.strip_prefix(path) else {
                        continue;
                    };
                    root = Some(patch_value(root, relative, value));
                }
                root
            }
        }
    }

    /// The effective value of one exact key, staged writes first.
    fn key_value(&self, staged: Option<&Staged>, key: &str) -> Option<Value> {
        if let Some(staged_value) = staged.and_then(|staged| staged.get(key)) {
            return staged_value.clone();
        }
        match self.local.get(key) {
            Some(record) => record.value.clone(),
            None => self.remote.get(key).and_then(|record| record.value.clone()),
        }
    }

    // ---- writes ------------------------------------------------------

    /// Apply a transaction atomically. Returns the leaf entries whose
    /// effective value actually changed.
    pub async fn commit(&mut self, tx: Transaction) -> Result<Vec<Entry>> {
        // Stage against a scratch lookup first so a rejected operation
        // leaves no trace.
        let mut tx_lookup = self.lookup.clone();
        let mut staged = Staged::new();
        for op in &tx.operations {
            match op {
                TransactionOperation::Put { path, value } => {
                    self.stage_put(&mut tx_lookup, &mut staged, path, value)?
                }
                TransactionOperation::Update { path, value } => {
                    self.stage_update(&mut tx_lookup, &mut staged, path, value)?
                }
                TransactionOperation::Delete { path } => {
                    self.stage_delete(&mut tx_lookup, &mut staged, path)?
                }
            }
        }

        let now = now_ms();
        let mut changed = Vec::new();
        let mut batch = Vec::new();
        for (key, new_value) in staged {
            if self.key_value(None, &key) == new_value {
                continue;
            }
            let path: EntityPath = key.parse()?;
            match &new_value {
                Some(_) => {
                    self.lookup.add(&path);
                }
                None => {
                    self.lookup.remove(&path);
                }
            }
            if new_value.is_none() && !self.remote.contains_key(&key) {
                // Never-synced key: nothing remote to tombstone over.
                self.local.remove(&key);
                batch.push(BatchOp::delete(StoreName::LocalRevisions, &key));
            } else {
                let reference_sync_timestamp = match self.local.get(&key) {
                    Some(existing) => existing.reference_sync_timestamp,
                    None => self.server_meta.last_modified,
                };
                let record = LocalRecord {
                    value: new_value.clone(),
                    update_time: now,
                    reference_sync_timestamp,
                };
                batch.push(BatchOp::put(
                    StoreName::LocalRevisions,
                    &key,
                    encode_record(&record)?,
                ));
                self.local.insert(key.clone(), record);
            }
            let entry = match new_value {
                Some(value) => Entry::new(key, value),
                None => Entry::tombstone(key),
            };
            changed.push(entry.with_update_time(now));
        }

        if !batch.is_empty() {
            self.adapter.apply_batch(batch).await?;
        }
        self.notify(&changed);
        Ok(changed)
    }

    fn stage_put(
        &self,
        lookup: &mut NodeLookup,
        staged: &mut Staged,
        path: &EntityPath,
        value: &Value,
    ) -> Result<()> {
        let classification = lookup.classify(path);
        match classification.match_type {
            MatchType::Ancestor => Err(DbError::HeritageConflict {
                path: path.to_string(),
                existing: classification.paths[0].to_string(),
            }),
            MatchType::Descendants if !classification.paths.is_empty() => {
                Err(DbError::HeritageConflict {
                    path: path.to_string(),
                    existing: classification.paths[0].to_string(),
                })
            }
            // An exact leaf is replaced; a free position is created.
            MatchType::Leaf | MatchType::None | MatchType::Descendants => {
                self.stage_subtree(lookup, staged, path, Some(value))
            }
        }
    }

    fn stage_update(
        &self,
        lookup: &mut NodeLookup,
        staged: &mut Staged,
        path: &EntityPath,
        value: &Value,
    ) -> Result<()> {
        let classification = lookup.classify(path);
        match classification.match_type {
            MatchType::None => Err(DbError::MissingEntity(path.to_string())),
            MatchType::Leaf => self.stage_subtree(lookup, staged, path, Some(value)),
            MatchType::Ancestor => {
                // The write lands inside an existing leaf value: patch it,
                // then re-flatten in case the patch grew a subtree.
                let leaf = classification.paths[0].clone();
                let key = leaf.to_string();
                let current = self
                    .key_value(Some(staged), &key)
                    .ok_or_else(|| DbError::MissingEntity(key.clone()))?;
                let relative = path
                    .strip_prefix(&leaf)
                    .ok_or_else(|| DbError::MissingEntity(path.to_string()))?;
                // `current` is already an owned copy, so patch it directly
                // instead of cloning the whole leaf value a second time.
                let mut patched = current;
                patch_in_place(&mut patched, relative, value.clone());
                self.stage_subtree(lookup, staged, &leaf, Some(&patched))
            }
            MatchType::Descendants => {
                if classification.paths.is_empty() {
                    return Err(DbError::MissingEntity(path.to_string()));
                }
                // Re-flatten over the existing leaf set: every new leaf must
                // land on an existing key, keys left uncovered are deleted.
                let existing: Vec<String> = classification
                    .paths
                    .iter()
                    .map(|leaf| leaf.to_string())
                    .collect();
                let mut covered: Staged = Staged::new();
                for (relative, leaf_value) in flatten_value(value) {
                    let key = path.join(relative.segments()).to_string();
                    if !existing.contains(&key) {
                        return Err(DbError::UnknownKeys {
                            base: path.to_string(),
                            unknown: key,
                        });
                    }
                    covered.insert(key, Some(leaf_value));
                }
                for key in existing {
                    if !covered.contains_key(&key) {
                        lookup.remove(&key.parse()?);
                        staged.insert(key, None);
                    }
                }
                staged.append(&mut covered);
                Ok(())
            }
        }
    }

    fn stage_delete(
        &self,
        lookup: &mut NodeLookup,
        staged: &mut Staged,
        path: &EntityPath,
    ) -> Result<()> {
        let classification = lookup.classify(path);
        match classification.match_type {
            // Deleting what does not exist is not an error.
            MatchType::None => Ok(()),
            MatchType::Ancestor => Err(DbError::HeritageConflict {
                path: path.to_string(),
                existing: classification.paths[0].to_string(),
            }),
            MatchType::Leaf | MatchType::Descendants => {
                for leaf in &classification.paths {
                    lookup.remove(leaf);
                    staged.insert(leaf.to_string(), None);
                }
                Ok(())
            }
        }
    }

    /// Stage the leaf-level difference between the current subtree at
    /// `base` and `new_value`, updating `lookup` to match.
    fn stage_subtree(
        &self,
        lookup: &mut NodeLookup,
        staged: &mut Staged,
        base: &EntityPath,
        new_value: Option<&Value>,
    ) -> Result<()> {
        let current = self.value_at(lookup, Some(staged), base);
        for entry in diff_tree(current.as_ref(), new_value) {
            let relative: EntityPath = entry.key.parse()?;
            let absolute = base.join(relative.segments());
            match entry.value {
                Some(value) => {
                    lookup.add(&absolute);
                    staged.insert(absolute.to_string(), Some(value));
                }
                None => {
                    lookup.remove(&absolute);
                    staged.insert(absolute.to_string(), None);
                }
            }
        }
        Ok(())
    }

    // ---- remote merge ------------------------------------------------

    /// Decode a batch of remote entry bytes and merge it.
    pub async fn merge_remote_bytes(&mut self, bytes: &[u8]) -> Result<Vec<Entry>> {
        let entries = compact_and_deserialize_entries(
            bytes,
            self.config.encryption_key.as_ref(),
            self.config.verify_checksums,
        )?;
        self.merge_remote(entries).await
    }

    /// Merge remotely committed entries into the remote revision store.
    ///
    /// No-op entries (commit already seen, or same stored value) and
    /// entries that would overlap an existing leaf are skipped; the server
    /// supersedes a stale tree shape with a rewrite, not with bare
    /// entries. Local revisions keep shadowing their keys; merged entries
    /// only surface (and notify) where no local write covers them. The
    /// sync cursor advances past skipped entries too.
    pub async fn merge_remote(&mut self, entries: Vec<Entry>) -> Result<Vec<Entry>> {
        let mut changed = Vec::new();
        let mut batch = Vec::new();
        let mut meta_dirty = false;

        for entry in entries {
            let commit_time = entry.metadata.commit_time.unwrap_or(0);
            if entry.metadata.is_head_entry {
                self.apply_rewrite(commit_time, &mut batch, &mut changed);
                meta_dirty = true;
                continue;
            }
            if commit_time > self.server_meta.last_modified {
                self.server_meta.last_modified = commit_time;
                meta_dirty = true;
            }
            if let Some(existing) = self.remote.get(&entry.key) {
                if existing.commit_time == commit_time || existing.value == entry.value {
                    continue;
                }
            }

            let path = entry.path()?;
            let classification = self.lookup.classify(&path);
            let conflicting = match classification.match_type {
                MatchType::Ancestor => true,
                MatchType::Descendants => !classification.paths.is_empty(),
                MatchType::Leaf | MatchType::None => false,
            };
            if conflicting {
                tracing::warn!(
                    db = %self.name,
                    key = %entry.key,
                    "skipping remote entry that overlaps an existing leaf"
                );
                continue;
            }

            let record = RemoteRecord::from_entry(&entry);
            batch.push(BatchOp::put(
                StoreName::RemoteRevisions,
                &entry.key,
                encode_record(&record)?,
            ));
            let previous = self.remote.insert(entry.key.clone(), record);

            if shadowed(&self.local, &entry.key) {
                tracing::debug!(
                    db = %self.name,
                    key = %entry.key,
                    "merged entry stays shadowed by a local revision"
                );
            } else {
                match &entry.value {
                    Some(_) => {
                        self.lookup.add(&path);
                    }
                    None => {
                        self.lookup.remove(&path);
                    }
                }
                let old_value = previous.and_then(|record| record.value);
                if old_value != entry.value {
                    changed.push(entry.clone());
                }
            }
        }

        if meta_dirty {
            batch.push(BatchOp::put(
                StoreName::GlobalMetadata,
                SERVER_METADATA_KEY,
                encode_record(&self.server_meta)?,
            ));
        }
        if !batch.is_empty() {
            self.adapter.apply_batch(batch).await?;
        }
        self.notify(&changed);
        Ok(changed)
    }

    /// A head entry: the remote datastore was rewritten from scratch.
    /// Drop all remote revisions; unshadowed ones surface as deletions,
    /// then the entries following the head entry rebuild the tree.
    fn apply_rewrite(
        &mut self,
        commit_time: Timestamp,
        batch: &mut Vec<BatchOp>,
        changed: &mut Vec<Entry>,
    ) {
        if commit_time <= self.server_meta.last_rewritten {
            return;
        }
        tracing::info!(db = %self.name, commit_time, "remote datastore was rewritten");
        let old_remote = std::mem::take(&mut self.remote);
        for (key, record) in old_remote {
            batch.push(BatchOp::delete(StoreName::RemoteRevisions, &key));
            if record.value.is_some() && !shadowed(&self.local, &key) {
                if let Ok(path) = key.parse::<EntityPath>() {
                    self.lookup.remove(&path);
                }
                changed.push(Entry::tombstone(key).with_update_time(commit_time));
            }
        }
        self.server_meta.last_rewritten = commit_time;
        if commit_time > self.server_meta.last_modified {
            self.server_meta.last_modified = commit_time;
        }
    }

    // ---- conflicts ---------------------------------------------------

    /// Keys where a remote commit landed after the local write's reference
    /// point with a different value.
    pub fn find_conflicts(&self, base: Option<&EntityPath>) -> Result<Vec<ConflictInfo>> {
        let base_string = base.map(|path| path.to_string());
        let mut conflicts = Vec::new();
        for (key, local) in &self.local {
            if let Some(base) = &base_string {
                if string_relationship(base, key) == PathRelationship::None {
                    continue;
                }
            }
            let Some(remote) = self.remote.get(key) else {
                continue;
            };
            if remote.commit_time > local.reference_sync_timestamp && remote.value != local.value {
                conflicts.push(ConflictInfo {
                    key: key.clone(),
                    path: key.parse()?,
                    local_value: local.value.clone(),
                    remote_value: remote.value.clone(),
                    local_update_time: local.update_time,
                    remote_update_time: remote.update_time,
                    remote_commit_time: remote.commit_time,
                });
            }
        }
        Ok(conflicts)
    }

    /// Run `resolver` over every outstanding conflict (optionally scoped
    /// to keys overlapping `base`) and settle each key on the returned
    /// value. Returns the entries whose effective value changed.
    pub async fn resolve_conflicts(
        &mut self,
        base: Option<&EntityPath>,
        resolver: &ConflictResolver,
    ) -> Result<Vec<Entry>> {
        let conflicts = self.find_conflicts(base)?;
        if conflicts.is_empty() {
            return Ok(Vec::new());
        }
        let now = now_ms();
        let mut changed = Vec::new();
        let mut batch = Vec::new();
        for conflict in conflicts {
            let key = conflict.key.clone();
            let path = conflict.path.clone();
            let remote_value = conflict.remote_value.clone();
            let remote_commit_time = conflict.remote_commit_time;
            let old_effective = self.key_value(None, &key);

            let resolved = resolver(conflict).await;
            if resolved == remote_value {
                // Settled on the remote side: the local revision is moot.
                self.local.remove(&key);
                batch.push(BatchOp::delete(StoreName::LocalRevisions, &key));
            } else {
                let record = LocalRecord {
                    value: resolved.clone(),
                    update_time: now,
                    reference_sync_timestamp: remote_commit_time,
                };
                batch.push(BatchOp::put(
                    StoreName::LocalRevisions,
                    &key,
                    encode_record(&record)?,
                ));
                self.local.insert(key.clone(), record);
            }

            if old_effective != resolved {
                match &resolved {
                    Some(_) => {
                        self.lookup.add(&path);
                    }
                    None => {
                        self.lookup.remove(&path);
                    }
                }
                let entry = match resolved {
                    Some(value) => Entry::new(key, value),
                    None => Entry::tombstone(key),
                };
                changed.push(entry.with_update_time(now));
            }
        }
        if !batch.is_empty() {
            self.adapter.apply_batch(batch).await?;
        }
        self.notify(&changed);
        Ok(changed)
    }

    // ---- push --------------------------------------------------------

    /// Local revisions awaiting acceptance, ascending by key, optionally
    /// scoped to keys overlapping `base`.
    pub fn pending_entries(&self, base: Option<&EntityPath>) -> Vec<Entry> {
        let base_string = base.map(|path| path.to_string());
        self.local
            .iter()
            .filter(|(key, _)| match &base_string {
                Some(base) => string_relationship(base, key) != PathRelationship::None,
                None => true,
            })
            .map(|(key, record)| Entry {
                key: key.clone(),
                value: record.value.clone(),
                metadata: canopy_engine::EntryMetadata {
                    update_time: record.update_time,
                    commit_time: None,
                    is_head_entry: false,
                },
            })
            .collect()
    }

    /// The full effective tree as entries, ascending by key. Tombstones
    /// are not part of the effective tree, so a rewrite built from this
    /// purges deleted history.
    pub fn effective_entries(&self) -> Vec<Entry> {
        let mut entries = Vec::new();
        for leaf in self.lookup.leaf_paths() {
            let key = leaf.to_string();
            let Some(value) = self.key_value(None, &key) else {
                continue;
            };
            let update_time = match self.local.get(&key) {
                Some(record) => record.update_time,
                None => self
                    .remote
                    .get(&key)
                    .map(|record| record.update_time)
                    .unwrap_or(0),
            };
            entries.push(Entry::new(key, value).with_update_time(update_time));
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Replace all revision state after the remote accepted a rewrite of
    /// `entries` at `commit_timestamp`. The effective tree is unchanged,
    /// so nothing is notified.
    pub async fn apply_local_rewrite(
        &mut self,
        entries: Vec<Entry>,
        commit_timestamp: Timestamp,
    ) -> Result<()> {
        self.adapter.clear(StoreName::LocalRevisions).await?;
        self.adapter.clear(StoreName::RemoteRevisions).await?;
        self.local.clear();
        self.remote.clear();

        let mut batch = Vec::new();
        for entry in entries {
            let record = RemoteRecord {
                value: entry.value,
                update_time: entry.metadata.update_time,
                commit_time: commit_timestamp,
            };
            batch.push(BatchOp::put(
                StoreName::RemoteRevisions,
                &entry.key,
                encode_record(&record)?,
            ));
            self.remote.insert(entry.key, record);
        }
        self.server_meta.last_modified = commit_timestamp;
        self.server_meta.last_rewritten = commit_timestamp;
        batch.push(BatchOp::put(
            StoreName::GlobalMetadata,
            SERVER_METADATA_KEY,
            encode_record(&self.server_meta)?,
        ));
        self.adapter.apply_batch(batch).await?;
        Ok(())
    }

    /// Serialize entries with this database's wire settings.
    pub fn encode_entries(&self, entries: &[Entry]) -> Result<Vec<u8>> {
        Ok(serialize_entries(
            entries,
            self.config.encryption_key.as_ref(),
            self.config.add_checksums,
        )?)
    }

    /// Promote pushed local revisions to remote revisions after the server
    /// accepted them at `commit_timestamp`. Effective values do not change,
    /// so nothing is notified.
    pub async fn promote_pushed(
        &mut self,
        keys: &[String],
        commit_timestamp: Timestamp,
    ) -> Result<()> {
        let mut batch = Vec::new();
        for key in keys {
            let Some(local) = self.local.remove(key) else {
                continue;
            };
            batch.push(BatchOp::delete(StoreName::LocalRevisions, key));
            let record = RemoteRecord {
                value: local.value,
                update_time: local.update_time,
                commit_time: commit_timestamp,
            };
            batch.push(BatchOp::put(
                StoreName::RemoteRevisions,
                key,
                encode_record(&record)?,
            ));
            self.remote.insert(key.clone(), record);
        }
        if commit_timestamp > self.server_meta.last_modified {
            self.server_meta.last_modified = commit_timestamp;
        }
        batch.push(BatchOp::put(
            StoreName::GlobalMetadata,
            SERVER_METADATA_KEY,
            encode_record(&self.server_meta)?,
        ));
        self.adapter.apply_batch(batch).await?;
        Ok(())
    }

    // ---- subscriptions -----------------------------------------------

    pub fn subscribe(
        &mut self,
        path: EntityPath,
        kind: SubscriptionKind,
    ) -> (
        SubscriptionId,
        tokio::sync::mpsc::UnboundedReceiver<ChangeEvent>,
    ) {
        let (id, receiver) = self.subscriptions.subscribe(path.clone(), kind);
        if kind == SubscriptionKind::Snapshot {
            // Observers get the current value up front.
            let value = self.get(&path);
            self.subscriptions.deliver(id, ChangeEvent::Snapshot { value });
        }
        (id, receiver)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    fn notify(&mut self, changed: &[Entry]) {
        if changed.is_empty() || self.subscriptions.is_empty() {
            return;
        }
        for affected in self.subscriptions.affected(changed) {
            let event = match affected.kind {
                SubscriptionKind::Diff => ChangeEvent::Diff {
                    entries: affected.entries,
                },
                SubscriptionKind::Snapshot => ChangeEvent::Snapshot {
                    value: self.value_at(&self.lookup, None, &affected.path),
                },
            };
            self.subscriptions.deliver(affected.id, event);
        }
    }

    // ---- teardown ----------------------------------------------------

    /// Drop all persisted state of this database.
    pub async fn wipe(&mut self) -> Result<()> {
        self.adapter.clear(StoreName::LocalRevisions).await?;
        self.adapter.clear(StoreName::RemoteRevisions).await?;
        self.adapter.clear(StoreName::GlobalMetadata).await?;
        self.local.clear();
        self.remote.clear();
        self.lookup.clear();
        self.server_meta = ServerMetadata::default();
        Ok(())
    }
}

/// Whether any local revision covers `key` (same key, above it, or below
/// it). Shadowed remote keys never surface in the effective tree.
fn shadowed(local: &BTreeMap<String, LocalRecord>, key: &str) -> bool {
    local
        .keys()
        .any(|local_key| string_relationship(local_key, key) != PathRelationship::None)
}
