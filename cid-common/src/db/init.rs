//! Database pool opening and schema creation
//!
//! The engine talks to four SQLite files:
//! - two concordance key-value stores (`primary-lookup`, `cluster-lookup`), read-only
//! - the cluster database (records and their identifiers), read-only
//! - the minter store (resolution cache and CID counter), read-write
//!
//! Schema creators are idempotent and public so that offline loaders and
//! tests can build the read-only stores.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// How a store is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// `mode=ro`: the engine never writes to this store
    ReadOnly,
    /// `mode=rwc`: create the file if missing
    ReadWriteCreate,
}

/// Busy timeout applied to every store connection
pub const BUSY_TIMEOUT_MS: u64 = 5000;

/// Open a connection pool on a SQLite file
///
/// Connection options (journal mode, busy timeout) are applied to every
/// pooled connection, not just the first one.
pub async fn open_pool(
    db_path: &Path,
    mode: AccessMode,
    max_connections: u32,
) -> Result<SqlitePool> {
    let options = match mode {
        AccessMode::ReadOnly => {
            if !db_path.exists() {
                return Err(crate::Error::Config(format!(
                    "Database not found: {}",
                    db_path.display()
                )));
            }
            SqliteConnectOptions::new().filename(db_path).read_only(true)
        }
        AccessMode::ReadWriteCreate => {
            // Create parent directory if it doesn't exist
            if let Some(parent) = db_path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            // WAL lets concurrent minters read while one writes
            SqliteConnectOptions::new()
                .filename(db_path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        }
    };

    let options = options
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Open (creating if needed) the minter store and ensure its schema
pub async fn init_minter_database(db_path: &Path, max_connections: u32) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    let pool = open_pool(db_path, AccessMode::ReadWriteCreate, max_connections).await?;

    if newly_created {
        info!("Initialized new minter database: {}", db_path.display());
    } else {
        info!("Opened existing minter database: {}", db_path.display());
    }

    create_minter_tables(&pool).await?;

    Ok(pool)
}

/// Create a concordance key-value table
///
/// Keys and values are raw big-endian bytes.
pub async fn create_kv_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv (
            key BLOB PRIMARY KEY,
            value BLOB NOT NULL
        ) WITHOUT ROWID
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the cluster database tables
///
/// `records.cid` is `'0'` for records not yet clustered.
pub async fn create_cluster_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            htid TEXT NOT NULL UNIQUE,
            cid TEXT NOT NULL DEFAULT '0',
            contribsys_id TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS identifiers (
            record_id INTEGER NOT NULL REFERENCES records(id) ON DELETE CASCADE,
            type TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (record_id, type, value)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_cid ON records(cid)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_contribsys_id ON records(contribsys_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_identifiers_type_value ON identifiers(type, value)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the minter cache and counter tables
///
/// The counter holds exactly one row (`id = 1`), seeded at 0.
pub async fn create_minter_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cid_minting_store (
            type TEXT NOT NULL,
            identifier TEXT NOT NULL,
            cid TEXT NOT NULL,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (type, identifier)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cid_minting_counter (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            cid INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO cid_minting_counter (id, cid) VALUES (1, 0)")
        .execute(pool)
        .await?;

    Ok(())
}
