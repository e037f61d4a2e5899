//! Engine context: long-lived handles to the stores the engine reads and writes

use crate::cluster_db::ClusterDbReader;
use crate::concordance::{ConcordanceResolver, SqliteKvStore};
use crate::minter_cache::LocalMinterCache;
use cid_common::config::MinterConfig;
use cid_common::db::{init_minter_database, open_pool, AccessMode};
use std::sync::Arc;
use tracing::info;

/// Handles shared by every `mint` call
#[derive(Clone)]
pub struct EngineContext {
    pub concordance: ConcordanceResolver,
    pub cluster_db: ClusterDbReader,
    pub cache: LocalMinterCache,
}

impl EngineContext {
    /// Assemble a context from already-built components
    pub fn new(
        concordance: ConcordanceResolver,
        cluster_db: ClusterDbReader,
        cache: LocalMinterCache,
    ) -> Self {
        Self {
            concordance,
            cluster_db,
            cache,
        }
    }

    /// Open every store named in the config
    ///
    /// Concordance and cluster stores are opened read-only; the minter store
    /// is created if missing.
    pub async fn open(config: &MinterConfig) -> cid_common::Result<Self> {
        config.validate()?;
        let timeout = config.query_timeout();

        let primary_pool =
            open_pool(&config.primary_lookup_db, AccessMode::ReadOnly, config.max_connections)
                .await?;
        let cluster_lookup_pool =
            open_pool(&config.cluster_lookup_db, AccessMode::ReadOnly, config.max_connections)
                .await?;
        info!(
            "Opened concordance stores: {}, {}",
            config.primary_lookup_db.display(),
            config.cluster_lookup_db.display()
        );

        let cluster_pool =
            open_pool(&config.cluster_db, AccessMode::ReadOnly, config.max_connections).await?;
        info!("Opened cluster database: {}", config.cluster_db.display());

        let minter_pool = init_minter_database(&config.minter_db, config.max_connections).await?;

        let concordance = ConcordanceResolver::new(
            Arc::new(SqliteKvStore::new(primary_pool)),
            Arc::new(SqliteKvStore::new(cluster_lookup_pool)),
            timeout,
        );
        let cluster_db = ClusterDbReader::new(cluster_pool, config.cid_width, timeout);
        let cache = LocalMinterCache::new(minter_pool, config.cid_width, timeout);

        Ok(Self::new(concordance, cluster_db, cache))
    }

    pub fn cid_width(&self) -> usize {
        self.cache.cid_width()
    }
}
