//! Integration tests for the task catalog.
//!
//! These tests verify Catalog operations against a real SQLite database file.

use harvester_core::{Catalog, CatalogError, Database, LeaseCoordinator, TaskKey, TaskStatus};
use tempfile::TempDir;

/// Helper to create a test database with migrations applied.
async fn setup_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("tasks.db");

    let db = Database::new(&db_path)
        .await
        .expect("Failed to create database");

    (db, temp_dir)
}

fn key(raw: &str) -> TaskKey {
    raw.parse().expect("valid task key")
}

#[tokio::test]
async fn test_create_sets_pending_defaults() {
    let (db, _temp_dir) = setup_test_db().await;
    let catalog = Catalog::new(db);

    let id = catalog
        .create(&key("spxw,20240621,2024-06-20"))
        .await
        .unwrap()
        .expect("new task id");

    let task = catalog.get_by_id(id).await.unwrap().unwrap();
    assert_eq!(task.key.symbol, "SPXW");
    assert_eq!(task.key.expiration_compact(), "20240621");
    assert_eq!(task.key.target_date_compact(), "20240620");
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retry_count, 0);
    assert!(task.lease_started_at.is_none());
    assert!(task.completed_at.is_none());
    assert!(task.last_error.is_none());
    assert!(task.artifact_reference.is_none());
    assert!(!task.created_at.is_empty());
}

#[tokio::test]
async fn test_tasks_persist_across_reopen() {
    let (db, temp_dir) = setup_test_db().await;
    Catalog::new(db.clone())
        .create_many(&[
            key("SPX,2024-06-21,2024-06-20"),
            key("SPX,2024-06-21,2024-06-18"),
        ])
        .await
        .unwrap();
    db.close().await;

    let reopened = Database::new(&temp_dir.path().join("tasks.db"))
        .await
        .unwrap();
    let counts = Catalog::new(reopened).count_by_status().await.unwrap();
    assert_eq!(counts.pending, 2);
}

#[tokio::test]
async fn test_concurrent_creates_of_same_key_yield_one_row() {
    let (db, temp_dir) = setup_test_db().await;
    let path = temp_dir.path().join("tasks.db");

    let mut handles = Vec::new();
    for _ in 0..4 {
        let peer = Database::new(&path).await.unwrap();
        handles.push(tokio::spawn(async move {
            Catalog::new(peer)
                .create(&key("SPX,2024-06-21,2024-06-20"))
                .await
                .unwrap()
        }));
    }

    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap().is_some() {
            created += 1;
        }
    }

    assert_eq!(created, 1);
    assert_eq!(
        Catalog::new(db).count_by_status().await.unwrap().total(),
        1
    );
}

#[tokio::test]
async fn test_count_and_list_by_status() {
    let (db, _temp_dir) = setup_test_db().await;
    let catalog = Catalog::new(db.clone());
    let coordinator = LeaseCoordinator::new(db);
    catalog
        .create_many(&[
            key("SPX,2024-06-21,2024-06-17"),
            key("SPX,2024-06-21,2024-06-18"),
            key("SPX,2024-06-21,2024-06-20"),
        ])
        .await
        .unwrap();

    let claimed = coordinator.claim_next(3).await.unwrap().unwrap();

    let counts = catalog.count_by_status().await.unwrap();
    assert_eq!(counts.get(TaskStatus::Pending), 2);
    assert_eq!(counts.get(TaskStatus::InProgress), 1);
    assert_eq!(counts.total(), 3);

    let in_progress = catalog
        .list_by_status(TaskStatus::InProgress, 10)
        .await
        .unwrap();
    assert_eq!(in_progress.len(), 1);
    assert_eq!(in_progress[0].id, claimed.id);
    assert!(in_progress[0].is_leased());

    let pending = catalog.list_by_status(TaskStatus::Pending, 1).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].key, key("SPX,2024-06-21,2024-06-18"));
}

#[tokio::test]
async fn test_get_unknown_key_is_not_found() {
    let (db, _temp_dir) = setup_test_db().await;
    let err = Catalog::new(db)
        .get(&key("SPX,2024-06-21,2024-06-20"))
        .await
        .unwrap_err();
    assert!(matches!(err, CatalogError::TaskNotFound(_)));
    assert!(err.to_string().contains("SPX 2024-06-21 2024-06-20"));
}

#[test]
fn test_invalid_keys_rejected_before_reaching_store() {
    for raw in [
        "SPX,2024-06-21",
        "SPX,2024-02-30,2024-02-01",
        "SP-X,2024-06-21,2024-06-20",
        ",2024-06-21,2024-06-20",
    ] {
        let err = raw.parse::<TaskKey>().unwrap_err();
        assert!(
            matches!(err, CatalogError::InvalidKey { .. }),
            "{raw} should be an invalid key"
        );
    }
}
