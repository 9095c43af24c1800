//! Write transactions.
//!
//! All writes go through a [`Transaction`]: an ordered list of operations
//! committed atomically against a consistent view of the tree. Later
//! operations in the same transaction see the effects of earlier ones.

use canopy_engine::{EntityPath, Value};

/// One write operation.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionOperation {
    /// Create a new entity; fails if the path overlaps an existing one
    Put { path: EntityPath, value: Value },
    /// Replace or partially rewrite an existing entity
    Update { path: EntityPath, value: Value },
    /// Remove the entity (or subtree of entities) at the path
    Delete { path: EntityPath },
}

impl TransactionOperation {
    pub fn path(&self) -> &EntityPath {
        match self {
            TransactionOperation::Put { path, .. }
            | TransactionOperation::Update { path, .. }
            | TransactionOperation::Delete { path } => path,
        }
    }
}

/// An ordered batch of writes, applied atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transaction {
    pub(crate) operations: Vec<TransactionOperation>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a put, builder style.
    pub fn put(mut self, path: impl Into<EntityPath>, value: impl Into<Value>) -> Self {
        self.operations.push(TransactionOperation::Put {
            path: path.into(),
            value: value.into(),
        });
        self
    }

    /// Queue an update, builder style.
    pub fn update(mut self, path: impl Into<EntityPath>, value: impl Into<Value>) -> Self {
        self.operations.push(TransactionOperation::Update {
            path: path.into(),
            value: value.into(),
        });
        self
    }

    /// Queue a delete, builder style.
    pub fn delete(mut self, path: impl Into<EntityPath>) -> Self {
        self.operations
            .push(TransactionOperation::Delete { path: path.into() });
        self
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_preserves_order() {
        let a: EntityPath = "['a']".parse().unwrap();
        let b: EntityPath = "['b']".parse().unwrap();
        let tx = Transaction::new()
            .put(a.clone(), Value::from(1))
            .delete(b.clone())
            .update(a.clone(), Value::from(2));
        assert_eq!(tx.len(), 3);
        assert_eq!(tx.operations[0].path(), &a);
        assert!(matches!(
            tx.operations[1],
            TransactionOperation::Delete { .. }
        ));
        assert!(matches!(
            tx.operations[2],
            TransactionOperation::Update { .. }
        ));
    }
}
