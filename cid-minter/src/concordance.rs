//! OCLC concordance resolver
//!
//! Reads the two key-value indices built offline from the OCLC concordance:
//! - `primary-lookup`: OCN -> primary OCN of its equivalence class
//! - `cluster-lookup`: primary OCN -> packed list of the other class members,
//!   absent when the class is a singleton
//!
//! Keys and single values are 8-byte big-endian integers; member lists are a
//! concatenation of them.

use crate::error::{bounded, LookupError, Store};
use async_trait::async_trait;
use cid_common::Ocn;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const OCN_WIDTH: usize = 8;

/// Read access to one key-value index
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Value stored under `key`, or `None` when the key is absent
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, sqlx::Error>;
}

/// Index stored in a SQLite file with a single `kv` table
#[derive(Clone)]
pub struct SqliteKvStore {
    pool: SqlitePool,
}

impl SqliteKvStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, sqlx::Error> {
        sqlx::query_scalar::<_, Vec<u8>>("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
    }
}

/// Index held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryKvStore {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.entries.insert(key, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, sqlx::Error> {
        Ok(self.entries.get(key).cloned())
    }
}

/// Encode an OCN as an index key or value
pub fn encode_ocn(ocn: Ocn) -> Vec<u8> {
    ocn.get().to_be_bytes().to_vec()
}

/// Decode a single OCN value
pub fn decode_ocn(bytes: &[u8]) -> Result<Ocn, LookupError> {
    let raw: [u8; OCN_WIDTH] = bytes.try_into().map_err(|_| {
        LookupError::invalid(
            Store::Concordance,
            format!("expected {} byte OCN, got {} bytes", OCN_WIDTH, bytes.len()),
        )
    })?;
    Ocn::new(u64::from_be_bytes(raw))
        .ok_or_else(|| LookupError::invalid(Store::Concordance, "OCN value 0"))
}

/// Encode a member list for `cluster-lookup`
pub fn encode_ocn_list<'a, I>(ocns: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a Ocn>,
{
    ocns.into_iter().flat_map(|ocn| encode_ocn(*ocn)).collect()
}

/// Decode a packed `cluster-lookup` member list
pub fn decode_ocn_list(bytes: &[u8]) -> Result<BTreeSet<Ocn>, LookupError> {
    if bytes.len() % OCN_WIDTH != 0 {
        return Err(LookupError::invalid(
            Store::Concordance,
            format!("member list length {} is not a multiple of {}", bytes.len(), OCN_WIDTH),
        ));
    }
    bytes.chunks_exact(OCN_WIDTH).map(decode_ocn).collect()
}

/// Build both indices in memory from `(primary, members)` equivalence classes
///
/// Every member (and the primary itself) maps to the primary. The member
/// list omits the primary and is only stored for classes with other members.
pub fn build_memory_indices<I>(classes: I) -> (MemoryKvStore, MemoryKvStore)
where
    I: IntoIterator<Item = (Ocn, Vec<Ocn>)>,
{
    let mut primary_lookup = MemoryKvStore::new();
    let mut cluster_lookup = MemoryKvStore::new();

    for (primary, members) in classes {
        let others: BTreeSet<Ocn> = members.into_iter().filter(|m| *m != primary).collect();

        primary_lookup.insert(encode_ocn(primary), encode_ocn(primary));
        for member in &others {
            primary_lookup.insert(encode_ocn(*member), encode_ocn(primary));
        }
        if !others.is_empty() {
            cluster_lookup.insert(encode_ocn(primary), encode_ocn_list(&others));
        }
    }

    (primary_lookup, cluster_lookup)
}

/// Expands OCNs into their OCLC equivalence classes
#[derive(Clone)]
pub struct ConcordanceResolver {
    primary_lookup: Arc<dyn KvStore>,
    cluster_lookup: Arc<dyn KvStore>,
    timeout: Duration,
}

impl ConcordanceResolver {
    pub fn new(
        primary_lookup: Arc<dyn KvStore>,
        cluster_lookup: Arc<dyn KvStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            primary_lookup,
            cluster_lookup,
            timeout,
        }
    }

    /// Primary OCN of `ocn`'s class, `None` if OCLC does not know `ocn`
    pub async fn primary_of(&self, ocn: Ocn) -> Result<Option<Ocn>, LookupError> {
        let key = encode_ocn(ocn);
        let value = bounded(Store::Concordance, self.timeout, self.primary_lookup.get(&key)).await?;
        value.as_deref().map(decode_ocn).transpose()
    }

    /// Other members of a class, `None` for singleton classes
    pub async fn cluster_of(&self, primary: Ocn) -> Result<Option<BTreeSet<Ocn>>, LookupError> {
        let key = encode_ocn(primary);
        let value = bounded(Store::Concordance, self.timeout, self.cluster_lookup.get(&key)).await?;
        value.as_deref().map(decode_ocn_list).transpose()
    }

    /// Full equivalence class of `ocn`, primary included
    ///
    /// `None` means OCLC does not know the OCN; it then takes part in
    /// resolution as itself.
    pub async fn expand(&self, ocn: Ocn) -> Result<Option<BTreeSet<Ocn>>, LookupError> {
        let Some(primary) = self.primary_of(ocn).await? else {
            debug!(ocn = %ocn, "OCN not in concordance");
            return Ok(None);
        };

        let mut class = self.cluster_of(primary).await?.unwrap_or_default();
        class.insert(primary);
        class.insert(ocn);
        Ok(Some(class))
    }

    /// Distinct equivalence classes of the given OCNs
    ///
    /// Unknown OCNs contribute nothing; OCNs of the same class yield it once.
    pub async fn expand_many(&self, ocns: &[Ocn]) -> Result<BTreeSet<BTreeSet<Ocn>>, LookupError> {
        let mut classes = BTreeSet::new();
        for ocn in ocns {
            if let Some(class) = self.expand(*ocn).await? {
                classes.insert(class);
            }
        }
        Ok(classes)
    }
}
