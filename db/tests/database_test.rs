//! End-to-end tests over the public `Database` API, local-only.

use std::sync::Arc;

use canopy_db::{ChangeEvent, Database, DatabaseConfig, DbError, MemoryAdapter, Transaction};
use canopy_engine::{object, EntityPath, Value};

fn path(text: &str) -> EntityPath {
    text.parse().unwrap()
}

async fn open() -> Database {
    Database::open("test", Arc::new(MemoryAdapter::new()), DatabaseConfig::new())
        .await
        .unwrap()
}

#[tokio::test]
async fn tree_walkthrough() {
    let db = open().await;

    db.put(
        path("['users'][0]"),
        object! {
            "name" => Value::from("Ada"),
            "tags" => Value::Array(vec![Value::from("admin"), Value::from("ops")]),
        },
    )
    .await
    .unwrap();

    // Reads at every level of the tree.
    assert_eq!(
        db.get(path("['users'][0]['name']")).await.unwrap(),
        Some(Value::from("Ada"))
    );
    assert_eq!(
        db.get(path("['users'][0]['tags'][1]")).await.unwrap(),
        Some(Value::from("ops"))
    );
    assert_eq!(
        db.get(path("['users'][0]")).await.unwrap(),
        Some(object! {
            "name" => Value::from("Ada"),
            "tags" => Value::Array(vec![Value::from("admin"), Value::from("ops")]),
        })
    );
    assert_eq!(
        db.keys(path("['users']")).await.unwrap(),
        vec![
            "['users'][0]['name']",
            "['users'][0]['tags'][0]",
            "['users'][0]['tags'][1]",
        ]
    );

    // Replacing one leaf leaves siblings alone.
    db.update(path("['users'][0]['name']"), Value::from("Grace"))
        .await
        .unwrap();
    assert_eq!(
        db.get(path("['users'][0]['tags'][0]")).await.unwrap(),
        Some(Value::from("admin"))
    );

    // Deleting the subtree removes every leaf under it.
    db.delete(path("['users'][0]['tags']")).await.unwrap();
    assert_eq!(db.get(path("['users'][0]['tags']")).await.unwrap(), None);
    assert_eq!(
        db.get(path("['users'][0]")).await.unwrap(),
        Some(object! { "name" => Value::from("Grace") })
    );

    db.close();
}

#[tokio::test]
async fn heritage_rules_are_enforced() {
    let db = open().await;
    db.put(path("['a']['b']"), Value::from(1)).await.unwrap();

    assert!(matches!(
        db.put(path("['a']"), Value::from(2)).await,
        Err(DbError::HeritageConflict { .. })
    ));
    assert!(matches!(
        db.put(path("['a']['b']['c']"), Value::from(2)).await,
        Err(DbError::HeritageConflict { .. })
    ));
    assert!(matches!(
        db.update(path("['zzz']"), Value::from(1)).await,
        Err(DbError::MissingEntity(_))
    ));

    db.close();
}

#[tokio::test]
async fn transactions_apply_atomically() {
    let db = open().await;
    db.put(path("['a']"), Value::from(1)).await.unwrap();

    // Second operation fails, so the first must not land.
    let result = db
        .commit(
            Transaction::new()
                .put(path("['b']"), Value::from(2))
                .put(path("['a']['below']"), Value::from(3)),
        )
        .await;
    assert!(matches!(result, Err(DbError::HeritageConflict { .. })));
    assert_eq!(db.get(path("['b']")).await.unwrap(), None);

    db.close();
}

#[tokio::test]
async fn extended_values_roundtrip_through_storage() {
    let adapter = Arc::new(MemoryAdapter::new());
    let db = Database::open("test", adapter.clone(), DatabaseConfig::new())
        .await
        .unwrap();
    let value = object! {
        "blob" => Value::Bytes(vec![0, 1, 254, 255]),
        "nan" => Value::Number(f64::NAN),
    };
    db.put(path("['x']"), value).await.unwrap();
    db.close();

    // Reopen over the same adapter: values come back from disk form.
    let reopened = Database::open("test", adapter, DatabaseConfig::new())
        .await
        .unwrap();
    assert_eq!(
        reopened.get(path("['x']['blob']")).await.unwrap(),
        Some(Value::Bytes(vec![0, 1, 254, 255]))
    );
    match reopened.get(path("['x']['nan']")).await.unwrap() {
        Some(Value::Number(n)) => assert!(n.is_nan()),
        other => panic!("unexpected value {other:?}"),
    }
    reopened.close();
}

#[tokio::test]
async fn subscribers_see_writes_observers_see_values() {
    let db = open().await;
    let (_diff_id, mut diffs) = db.subscribe(path("['doc']")).await.unwrap();
    let (_snap_id, mut snaps) = db.observe(path("['doc']['title']")).await.unwrap();

    // Initial observation fires immediately.
    assert_eq!(
        snaps.recv().await.unwrap(),
        ChangeEvent::Snapshot { value: None }
    );

    db.put(path("['doc']"), object! { "title" => Value::from("hello") })
        .await
        .unwrap();

    match diffs.recv().await.unwrap() {
        ChangeEvent::Diff { entries } => {
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0].key, "['doc']['title']");
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(
        snaps.recv().await.unwrap(),
        ChangeEvent::Snapshot {
            value: Some(Value::from("hello"))
        }
    );

    // After unsubscribe, nothing more arrives.
    db.unsubscribe(_diff_id).await.unwrap();
    db.delete(path("['doc']")).await.unwrap();
    assert!(diffs.recv().await.is_none());

    db.close();
}

#[tokio::test]
async fn closed_database_rejects_requests() {
    let db = open().await;
    db.close();
    assert!(matches!(
        db.get(path("['a']")).await,
        Err(DbError::Closed)
    ));
    assert!(db.is_closed());
}

#[tokio::test]
async fn wipe_clears_persisted_state() {
    let adapter = Arc::new(MemoryAdapter::new());
    let db = Database::open("test", adapter.clone(), DatabaseConfig::new())
        .await
        .unwrap();
    db.put(path("['a']"), Value::from(1)).await.unwrap();
    db.wipe().await.unwrap();
    assert_eq!(db.get(path("['a']")).await.unwrap(), None);
    db.close();

    let reopened = Database::open("test", adapter, DatabaseConfig::new())
        .await
        .unwrap();
    assert_eq!(reopened.get(path("['a']")).await.unwrap(), None);
    reopened.close();
}
