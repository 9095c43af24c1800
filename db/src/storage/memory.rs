//! In-memory reference adapter.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{DbError, Result};

use super::{BatchOp, StorageAdapter, StoreName};

type Store = BTreeMap<String, serde_json::Value>;

/// [`StorageAdapter`] backed by in-process maps.
///
/// The reference implementation, used in tests and for throwaway databases.
/// Batches are atomic because all three stores live behind one lock.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    stores: Mutex<BTreeMap<StoreName, Store>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_stores<T>(&self, f: impl FnOnce(&mut BTreeMap<StoreName, Store>) -> T) -> Result<T> {
        let mut stores = self
            .stores
            .lock()
            .map_err(|_| DbError::Storage("memory adapter lock poisoned".into()))?;
        Ok(f(&mut stores))
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn get(&self, store: StoreName, key: &str) -> Result<Option<serde_json::Value>> {
        self.with_stores(|stores| {
            stores
                .get(&store)
                .and_then(|records| records.get(key))
                .cloned()
        })
    }

    async fn put(&self, store: StoreName, key: &str, record: serde_json::Value) -> Result<()> {
        self.with_stores(|stores| {
            stores.entry(store).or_default().insert(key.into(), record);
        })
    }

    async fn delete(&self, store: StoreName, key: &str) -> Result<()> {
        self.with_stores(|stores| {
            if let Some(records) = stores.get_mut(&store) {
                records.remove(key);
            }
        })
    }

    async fn keys(&self, store: StoreName) -> Result<Vec<String>> {
        self.with_stores(|stores| {
            stores
                .get(&store)
                .map(|records| records.keys().cloned().collect())
                .unwrap_or_default()
        })
    }

    async fn entries(&self, store: StoreName) -> Result<Vec<(String, serde_json::Value)>> {
        self.with_stores(|stores| {
            stores
                .get(&store)
                .map(|records| {
                    records
                        .iter()
                        .map(|(key, record)| (key.clone(), record.clone()))
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    async fn apply_batch(&self, batch: Vec<BatchOp>) -> Result<()> {
        self.with_stores(|stores| {
            for op in batch {
                let records = stores.entry(op.store).or_default();
                match op.record {
                    Some(record) => {
                        records.insert(op.key, record);
                    }
                    None => {
                        records.remove(&op.key);
                    }
                }
            }
        })
    }

    async fn clear(&self, store: StoreName) -> Result<()> {
        self.with_stores(|stores| {
            stores.remove(&store);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn put_get_delete() {
        let adapter = MemoryAdapter::new();
        adapter
            .put(StoreName::LocalRevisions, "['a']", json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(
            adapter.get(StoreName::LocalRevisions, "['a']").await.unwrap(),
            Some(json!({"x": 1}))
        );
        // Stores are independent
        assert_eq!(
            adapter.get(StoreName::RemoteRevisions, "['a']").await.unwrap(),
            None
        );
        adapter.delete(StoreName::LocalRevisions, "['a']").await.unwrap();
        assert_eq!(
            adapter.get(StoreName::LocalRevisions, "['a']").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn keys_are_sorted() {
        let adapter = MemoryAdapter::new();
        for key in ["['b']", "['a']", "['c']"] {
            adapter
                .put(StoreName::RemoteRevisions, key, json!(null))
                .await
                .unwrap();
        }
        assert_eq!(
            adapter.keys(StoreName::RemoteRevisions).await.unwrap(),
            vec!["['a']", "['b']", "['c']"]
        );
    }

    #[tokio::test]
    async fn batches_mix_stores_puts_and_deletes() {
        let adapter = MemoryAdapter::new();
        adapter
            .put(StoreName::LocalRevisions, "['gone']", json!(1))
            .await
            .unwrap();
        adapter
            .apply_batch(vec![
                BatchOp::put(StoreName::RemoteRevisions, "['a']", json!(2)),
                BatchOp::delete(StoreName::LocalRevisions, "['gone']"),
            ])
            .await
            .unwrap();
        assert_eq!(
            adapter.get(StoreName::RemoteRevisions, "['a']").await.unwrap(),
            Some(json!(2))
        );
        assert_eq!(
            adapter.get(StoreName::LocalRevisions, "['gone']").await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn clear_empties_one_store() {
        let adapter = MemoryAdapter::new();
        adapter
            .put(StoreName::LocalRevisions, "['a']", json!(1))
            .await
            .unwrap();
        adapter
            .put(StoreName::GlobalMetadata, "server", json!(2))
            .await
            .unwrap();
        adapter.clear(StoreName::LocalRevisions).await.unwrap();
        assert!(adapter.keys(StoreName::LocalRevisions).await.unwrap().is_empty());
        assert_eq!(adapter.keys(StoreName::GlobalMetadata).await.unwrap().len(), 1);
    }
}
