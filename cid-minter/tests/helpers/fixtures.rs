//! Database and concordance fixtures
//!
//! File-backed SQLite databases in a temp directory plus an in-memory
//! concordance holding the classes the scenarios below rely on:
//! - `{28477569, 33393343, 44192417}`, Zephir cluster 009547317 owns the first two
//! - `{140869, 1150810243}` and `{2094039, 1008263420}`; cluster 000002076 owns
//!   140869, 2094039 and 241092814 while 102337772 owns 1008263420
//! - singleton `{555}`, unknown to Zephir

use async_trait::async_trait;
use cid_common::{Cid, Ocn};
use cid_minter::concordance::build_memory_indices;
use cid_minter::{
    CidMinter, ClusterDbReader, ConcordanceResolver, EngineContext, KvStore, LocalMinterCache,
    MemoryKvStore,
};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const CID_WIDTH: usize = 9;

pub fn cid(raw: &str) -> Cid {
    Cid::parse(raw, CID_WIDTH).unwrap()
}

pub fn ocn(value: u64) -> Ocn {
    Ocn::new(value).unwrap()
}

/// Concordance store that counts reads
#[derive(Clone)]
pub struct CountingKvStore {
    inner: MemoryKvStore,
    reads: Arc<AtomicUsize>,
}

impl CountingKvStore {
    pub fn new(inner: MemoryKvStore, reads: Arc<AtomicUsize>) -> Self {
        Self { inner, reads }
    }
}

#[async_trait]
impl KvStore for CountingKvStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, sqlx::Error> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }
}

/// Concordance store whose every read fails
pub struct FailingKvStore;

#[async_trait]
impl KvStore for FailingKvStore {
    async fn get(&self, _key: &[u8]) -> Result<Option<Vec<u8>>, sqlx::Error> {
        Err(sqlx::Error::PoolTimedOut)
    }
}

/// Concordance store that panics on read
pub struct PanickingKvStore;

#[async_trait]
impl KvStore for PanickingKvStore {
    async fn get(&self, _key: &[u8]) -> Result<Option<Vec<u8>>, sqlx::Error> {
        panic!("concordance store unavailable");
    }
}

/// Engine wired to temp-dir databases
pub struct TestEnv {
    _dir: TempDir,
    pub cluster_pool: SqlitePool,
    pub minter_pool: SqlitePool,
    pub minter: CidMinter,
    /// Reads made against either concordance store
    pub concordance_reads: Arc<AtomicUsize>,
}

impl TestEnv {
    pub fn cache(&self) -> &LocalMinterCache {
        &self.minter.context().cache
    }

    pub fn concordance_reads(&self) -> usize {
        self.concordance_reads.load(Ordering::SeqCst)
    }
}

pub fn fixture_classes() -> Vec<(Ocn, Vec<Ocn>)> {
    vec![
        (ocn(28477569), vec![ocn(33393343), ocn(44192417)]),
        (ocn(140869), vec![ocn(1150810243)]),
        (ocn(2094039), vec![ocn(1008263420)]),
        (ocn(555), vec![]),
    ]
}

/// Create an empty cluster database
pub async fn create_cluster_db(path: &Path) -> anyhow::Result<SqlitePool> {
    let pool = SqlitePool::connect(&format!("sqlite://{}?mode=rwc", path.display())).await?;
    cid_common::db::create_cluster_tables(&pool).await?;
    Ok(pool)
}

pub async fn insert_record(
    pool: &SqlitePool,
    htid: &str,
    cid: &str,
    contribsys_id: Option<&str>,
    ocns: &[u64],
) -> anyhow::Result<()> {
    let record_id = sqlx::query("INSERT INTO records (htid, cid, contribsys_id) VALUES (?, ?, ?)")
        .bind(htid)
        .bind(cid)
        .bind(contribsys_id)
        .execute(pool)
        .await?
        .last_insert_rowid();

    for ocn in ocns {
        sqlx::query("INSERT INTO identifiers (record_id, type, value) VALUES (?, 'ocn', ?)")
            .bind(record_id)
            .bind(ocn.to_string())
            .execute(pool)
            .await?;
    }
    Ok(())
}

/// Records behind every scenario of the integration tests
pub async fn seed_fixture_records(pool: &SqlitePool) -> anyhow::Result<()> {
    // OCN resolution
    insert_record(pool, "mdp.39015001", "009547317", Some("miu.990001"), &[28477569]).await?;
    insert_record(pool, "mdp.39015002", "009547317", Some("miu.990002"), &[33393343]).await?;
    insert_record(pool, "uc1.b001", "000002076", Some("uc1.b001"), &[140869, 2094039]).await?;
    insert_record(pool, "uc1.b002", "000002076", Some("uc1.b002"), &[241092814]).await?;
    insert_record(pool, "nyp.33433001", "102337772", Some("nyp.001"), &[1008263420]).await?;

    // Mixed lineage cluster
    insert_record(pool, "hvd.1", "000000300", Some("miu.100"), &[]).await?;
    insert_record(pool, "hvd.2", "000000300", Some("pur.200"), &[]).await?;

    // One lineage spelled two ways
    insert_record(pool, "inu.1", "000000400", Some("inu.500"), &[]).await?;
    insert_record(pool, "inu.2", "000000400", Some("inu500"), &[]).await?;

    // Previous sysids in separate clusters
    insert_record(pool, "uc1.p1", "000000500", Some("uc1.p1x"), &[]).await?;
    insert_record(pool, "uc1.p2", "000000600", Some("uc1.p2x"), &[]).await?;

    // Record already clustered, used to observe a cluster change
    insert_record(pool, "wu.moving", "000000700", Some("wu.700"), &[]).await?;

    // Two single-lineage clusters matched by sysid
    insert_record(pool, "coo.1", "000000800", Some("coo.800"), &[]).await?;
    insert_record(pool, "coo.2", "000000900", Some("coo.900"), &[]).await?;

    // Not clustered yet
    insert_record(pool, "mdp.unclustered", "0", Some("miu.000"), &[44192417]).await?;
    Ok(())
}

/// Fixture records and concordance, counting concordance reads
pub async fn test_env() -> TestEnv {
    let reads = Arc::new(AtomicUsize::new(0));
    let (primary, cluster) = build_memory_indices(fixture_classes());
    test_env_with_concordance(
        Arc::new(CountingKvStore::new(primary, Arc::clone(&reads))),
        Arc::new(CountingKvStore::new(cluster, Arc::clone(&reads))),
        reads,
    )
    .await
}

/// Fixture records with the given concordance stores
pub async fn test_env_with_concordance(
    primary: Arc<dyn KvStore>,
    cluster: Arc<dyn KvStore>,
    reads: Arc<AtomicUsize>,
) -> TestEnv {
    let dir = TempDir::new().unwrap();
    let timeout = Duration::from_secs(5);

    let cluster_pool = create_cluster_db(&dir.path().join("zephir.db")).await.unwrap();
    seed_fixture_records(&cluster_pool).await.unwrap();

    let minter_pool = cid_common::db::init_minter_database(&dir.path().join("minter.db"), 4)
        .await
        .unwrap();

    let ctx = EngineContext::new(
        ConcordanceResolver::new(primary, cluster, timeout),
        ClusterDbReader::new(cluster_pool.clone(), CID_WIDTH, timeout),
        LocalMinterCache::new(minter_pool.clone(), CID_WIDTH, timeout),
    );

    TestEnv {
        _dir: dir,
        cluster_pool,
        minter_pool,
        minter: CidMinter::new(ctx),
        concordance_reads: reads,
    }
}

/// Current counter value
pub async fn counter_value(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT cid FROM cid_minting_counter WHERE id = 1")
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Rows in the cache table
pub async fn count_cache_rows(pool: &SqlitePool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM cid_minting_store")
        .fetch_one(pool)
        .await
        .unwrap()
}
