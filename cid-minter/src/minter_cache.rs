//! Local minter cache and CID counter
//!
//! A memo of earlier resolutions, keyed by `(type, identifier)`, plus the
//! single-row counter new CIDs are drawn from. The memo is advisory: stale or
//! contradictory entries only send the orchestrator back to the
//! authoritative stores.

use crate::error::{bounded, LookupError, Store};
use cid_common::{Cid, IdentifierKind};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};

/// Bound parameters per IN-list query
const IN_LIST_CHUNK: usize = 500;

/// Result of probing the cache with a list of identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// No identifier is cached
    Miss,
    /// Every cached identifier agrees on one CID
    Hit(Cid),
    /// Cached identifiers point at different CIDs (sorted)
    Conflict(Vec<Cid>),
}

/// Effect of a write-through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Resolution cache and counter in the minter store
#[derive(Clone)]
pub struct LocalMinterCache {
    pool: SqlitePool,
    cid_width: usize,
    timeout: Duration,
}

impl LocalMinterCache {
    pub fn new(pool: SqlitePool, cid_width: usize, timeout: Duration) -> Self {
        Self {
            pool,
            cid_width,
            timeout,
        }
    }

    pub fn cid_width(&self) -> usize {
        self.cid_width
    }

    /// Probe the cache for identifiers of one kind
    ///
    /// Previous sysids are looked up in the sysid namespace.
    pub async fn lookup(
        &self,
        kind: IdentifierKind,
        identifiers: &[String],
    ) -> Result<CacheLookup, LookupError> {
        let namespace = kind.cache_namespace().as_str();
        let mut cids: BTreeSet<Cid> = BTreeSet::new();

        for chunk in identifiers.chunks(IN_LIST_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("SELECT DISTINCT cid FROM cid_minting_store WHERE type = ");
            builder.push_bind(namespace);
            builder.push(" AND identifier IN (");
            let mut separated = builder.separated(", ");
            for identifier in chunk {
                separated.push_bind(identifier.clone());
            }
            separated.push_unseparated(")");

            let rows: Vec<String> = bounded(
                Store::MinterCache,
                self.timeout,
                builder.build_query_scalar::<String>().fetch_all(&self.pool),
            )
            .await?;

            for raw in rows {
                match Cid::parse(&raw, self.cid_width) {
                    Some(cid) => {
                        cids.insert(cid);
                    }
                    None => warn!(kind = %kind, cid = %raw, "Ignoring unusable cached cid"),
                }
            }
        }

        let mut cids: Vec<Cid> = cids.into_iter().collect();
        let lookup = match cids.len() {
            0 => CacheLookup::Miss,
            1 => CacheLookup::Hit(cids.remove(0)),
            _ => CacheLookup::Conflict(cids),
        };
        debug!(kind = %kind, identifiers = identifiers.len(), result = ?lookup, "Minter cache lookup");
        Ok(lookup)
    }

    /// Record that `identifier` resolved to `cid`
    ///
    /// Concurrent writers of the same key are last-writer-wins.
    pub async fn write_through(
        &self,
        kind: IdentifierKind,
        identifier: &str,
        cid: &Cid,
    ) -> Result<WriteOutcome, LookupError> {
        let namespace = kind.cache_namespace().as_str();

        let inserted = bounded(
            Store::MinterCache,
            self.timeout,
            sqlx::query(
                r#"
                INSERT INTO cid_minting_store (type, identifier, cid)
                VALUES (?, ?, ?)
                ON CONFLICT(type, identifier) DO NOTHING
                "#,
            )
            .bind(namespace)
            .bind(identifier)
            .bind(cid.as_str())
            .execute(&self.pool),
        )
        .await?;

        if inserted.rows_affected() > 0 {
            return Ok(WriteOutcome::Inserted);
        }

        let updated = bounded(
            Store::MinterCache,
            self.timeout,
            sqlx::query(
                r#"
                UPDATE cid_minting_store
                SET cid = ?, updated_at = CURRENT_TIMESTAMP
                WHERE type = ? AND identifier = ? AND cid <> ?
                "#,
            )
            .bind(cid.as_str())
            .bind(namespace)
            .bind(identifier)
            .bind(cid.as_str())
            .execute(&self.pool),
        )
        .await?;

        if updated.rows_affected() > 0 {
            Ok(WriteOutcome::Updated)
        } else {
            Ok(WriteOutcome::Unchanged)
        }
    }

    /// Draw the next CID from the counter
    ///
    /// Increment and read are one statement, so concurrent callers always
    /// receive distinct values.
    pub async fn mint_next(&self) -> Result<Cid, LookupError> {
        // Stepped to completion so the implicit write transaction ends here
        let values: Vec<i64> = bounded(
            Store::MinterCache,
            self.timeout,
            sqlx::query_scalar("UPDATE cid_minting_counter SET cid = cid + 1 WHERE id = 1 RETURNING cid")
                .fetch_all(&self.pool),
        )
        .await?;

        let value = values
            .first()
            .copied()
            .ok_or_else(|| LookupError::invalid(Store::MinterCache, "counter row missing"))?;
        let value = u64::try_from(value).map_err(|_| {
            LookupError::invalid(Store::MinterCache, format!("negative counter value {}", value))
        })?;

        let cid = Cid::from_number(value, self.cid_width);
        if cid.as_str().len() > self.cid_width {
            return Err(LookupError::invalid(
                Store::MinterCache,
                format!("counter value {} exceeds cid width {}", value, self.cid_width),
            ));
        }
        Ok(cid)
    }

    /// Current counter value (the highest CID issued)
    pub async fn current_counter(&self) -> Result<Option<u64>, LookupError> {
        let value: Option<i64> = bounded(
            Store::MinterCache,
            self.timeout,
            sqlx::query_scalar("SELECT cid FROM cid_minting_counter WHERE id = 1")
                .fetch_optional(&self.pool),
        )
        .await?;

        Ok(value.and_then(|v| u64::try_from(v).ok()))
    }

    /// Raise the counter to at least `at_least`; never lowers it
    ///
    /// Returns the counter value after the update.
    pub async fn seed_counter(&self, at_least: u64) -> Result<u64, LookupError> {
        let at_least = i64::try_from(at_least).map_err(|_| {
            LookupError::invalid(Store::MinterCache, format!("seed value {} out of range", at_least))
        })?;

        let values: Vec<i64> = bounded(
            Store::MinterCache,
            self.timeout,
            sqlx::query_scalar(
                "UPDATE cid_minting_counter SET cid = MAX(cid, ?) WHERE id = 1 RETURNING cid",
            )
            .bind(at_least)
            .fetch_all(&self.pool),
        )
        .await?;

        values
            .first()
            .and_then(|v| u64::try_from(*v).ok())
            .ok_or_else(|| LookupError::invalid(Store::MinterCache, "counter row missing"))
    }
}
