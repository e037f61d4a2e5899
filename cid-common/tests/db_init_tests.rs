//! Tests for store opening and schema creation

use cid_common::db::{
    create_cluster_tables, create_kv_table, init_minter_database, open_pool, AccessMode,
};
use tempfile::TempDir;

#[tokio::test]
async fn test_minter_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("minter.db");

    let pool = init_minter_database(&db_path, 2).await;
    assert!(pool.is_ok(), "Minter database initialization failed: {:?}", pool.err());
    assert!(db_path.exists(), "Database file was not created");

    let counter: i64 = sqlx::query_scalar("SELECT cid FROM cid_minting_counter WHERE id = 1")
        .fetch_one(&pool.unwrap())
        .await
        .unwrap();
    assert_eq!(counter, 0);
}

#[tokio::test]
async fn test_minter_database_reopen_keeps_counter() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("minter.db");

    let pool = init_minter_database(&db_path, 2).await.unwrap();
    sqlx::query("UPDATE cid_minting_counter SET cid = 42 WHERE id = 1")
        .execute(&pool)
        .await
        .unwrap();
    pool.close().await;

    let pool = init_minter_database(&db_path, 2).await.unwrap();
    let counter: i64 = sqlx::query_scalar("SELECT cid FROM cid_minting_counter WHERE id = 1")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(counter, 42, "Re-initialization must not reset the counter");
}

#[tokio::test]
async fn test_counter_table_holds_single_row() {
    let temp_dir = TempDir::new().unwrap();
    let pool = init_minter_database(&temp_dir.path().join("minter.db"), 2)
        .await
        .unwrap();

    let second_row = sqlx::query("INSERT INTO cid_minting_counter (id, cid) VALUES (2, 0)")
        .execute(&pool)
        .await;
    assert!(second_row.is_err(), "Counter must reject a second row");
}

#[tokio::test]
async fn test_read_only_pool_requires_existing_file() {
    let temp_dir = TempDir::new().unwrap();
    let result = open_pool(&temp_dir.path().join("absent.db"), AccessMode::ReadOnly, 1).await;
    assert!(matches!(result, Err(cid_common::Error::Config(_))));
}

#[tokio::test]
async fn test_read_only_pool_rejects_writes() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("zephir.db");

    // Rollback-journal file, as delivered by the offline loaders
    let writer = sqlx::SqlitePool::connect(&format!("sqlite://{}?mode=rwc", db_path.display()))
        .await
        .unwrap();
    create_cluster_tables(&writer).await.unwrap();
    create_kv_table(&writer).await.unwrap();
    writer.close().await;

    let reader = open_pool(&db_path, AccessMode::ReadOnly, 1).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
        .fetch_one(&reader)
        .await
        .unwrap();
    assert_eq!(count, 0);

    let write = sqlx::query("INSERT INTO records (htid, cid) VALUES ('x.1', '1')")
        .execute(&reader)
        .await;
    assert!(write.is_err(), "Write through a read-only pool should fail");
}
