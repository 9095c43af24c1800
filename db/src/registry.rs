//! Named database registry.
//!
//! Opening the same name twice must not spawn two dispatchers over the
//! same storage; the registry hands out clones of the already-open handle
//! instead.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::DatabaseConfig;
use crate::database::Database;
use crate::error::Result;
use crate::storage::StorageAdapter;

/// Process-wide map of open databases, keyed by name.
#[derive(Debug, Default)]
pub struct Registry {
    databases: Mutex<HashMap<String, Database>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `name`, or return the existing open handle. `adapter` and
    /// `config` only apply when the database is not already open.
    pub async fn open(
        &self,
        name: &str,
        adapter: Arc<dyn StorageAdapter>,
        config: DatabaseConfig,
    ) -> Result<Database> {
        let mut databases = self.databases.lock().await;
        if let Some(db) = databases.get(name) {
            if !db.is_closed() {
                return Ok(db.clone());
            }
        }
        let db = Database::open(name, adapter, config).await?;
        databases.insert(name.to_string(), db.clone());
        Ok(db)
    }

    /// The open handle for `name`, if any.
    pub async fn get(&self, name: &str) -> Option<Database> {
        let databases = self.databases.lock().await;
        databases.get(name).filter(|db| !db.is_closed()).cloned()
    }

    /// Close and forget `name`. Returns whether it was open.
    pub async fn close(&self, name: &str) -> bool {
        let mut databases = self.databases.lock().await;
        match databases.remove(name) {
            Some(db) => {
                db.close();
                true
            }
            None => false,
        }
    }

    /// Close every open database.
    pub async fn close_all(&self) {
        let mut databases = self.databases.lock().await;
        for (_, db) in databases.drain() {
            db.close();
        }
    }

    /// Names of currently open databases, ascending.
    pub async fn names(&self) -> Vec<String> {
        let databases = self.databases.lock().await;
        let mut names: Vec<String> = databases
            .iter()
            .filter(|(_, db)| !db.is_closed())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryAdapter;
    use canopy_engine::{EntityPath, Value};

    fn path(text: &str) -> EntityPath {
        text.parse().unwrap()
    }

    #[tokio::test]
    async fn open_returns_the_same_handle() {
        let registry = Registry::new();
        let adapter = Arc::new(MemoryAdapter::new());
        let first = registry
            .open("app", adapter.clone(), DatabaseConfig::new())
            .await
            .unwrap();
        first.put(path("['a']"), Value::from(1)).await.unwrap();

        // A second open with a different adapter still sees the state:
        // it is the same database.
        let second = registry
            .open("app", Arc::new(MemoryAdapter::new()), DatabaseConfig::new())
            .await
            .unwrap();
        assert_eq!(second.get(path("['a']")).await.unwrap(), Some(Value::from(1)));
        assert_eq!(registry.names().await, vec!["app"]);
    }

    #[tokio::test]
    async fn close_stops_the_database() {
        let registry = Registry::new();
        let db = registry
            .open("app", Arc::new(MemoryAdapter::new()), DatabaseConfig::new())
            .await
            .unwrap();
        assert!(registry.close("app").await);
        assert!(!registry.close("app").await);
        assert!(db.is_closed());
        assert!(matches!(
            db.get(path("['a']")).await,
            Err(crate::DbError::Closed)
        ));
        assert!(registry.get("app").await.is_none());
    }

    #[tokio::test]
    async fn reopen_after_close_loads_fresh() {
        let registry = Registry::new();
        let adapter = Arc::new(MemoryAdapter::new());
        let db = registry
            .open("app", adapter.clone(), DatabaseConfig::new())
            .await
            .unwrap();
        db.put(path("['a']"), Value::from(1)).await.unwrap();
        registry.close("app").await;

        let reopened = registry
            .open("app", adapter, DatabaseConfig::new())
            .await
            .unwrap();
        assert_eq!(
            reopened.get(path("['a']")).await.unwrap(),
            Some(Value::from(1))
        );
    }
}
