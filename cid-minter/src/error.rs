//! Error types for the minting engine
//!
//! Lookups distinguish "found nothing" (`Ok(None)` / empty results) from
//! "could not look" (`LookupError`). A failed or timed-out query is never
//! reported as a miss.

use cid_common::Cid;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Store a lookup was made against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    Concordance,
    ClusterDb,
    MinterCache,
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Store::Concordance => "concordance",
            Store::ClusterDb => "cluster database",
            Store::MinterCache => "minter cache",
        };
        f.write_str(name)
    }
}

/// Failure of a single store query
#[derive(Debug, Error)]
pub enum LookupError {
    /// The query itself failed
    #[error("{store} query failed: {source}")]
    Database {
        store: Store,
        #[source]
        source: sqlx::Error,
    },

    /// The query did not finish before its deadline
    #[error("{store} query timed out after {timeout_ms} ms")]
    Timeout { store: Store, timeout_ms: u64 },

    /// The store returned something the engine cannot interpret
    #[error("{store} returned invalid data: {detail}")]
    InvalidData { store: Store, detail: String },
}

impl LookupError {
    pub fn invalid(store: Store, detail: impl Into<String>) -> Self {
        LookupError::InvalidData {
            store,
            detail: detail.into(),
        }
    }
}

/// Failure of one `mint` call
#[derive(Debug, Error)]
pub enum MintError {
    /// Record has no usable htid; reject the record
    #[error("Record has no htid")]
    MissingHtid,

    /// Previous sysids point at more than one cluster; reject the record
    #[error("Previous contribsys ids {sysids:?} of {htid} match distinct clusters {cids:?}")]
    AmbiguousPreviousSysid {
        htid: String,
        sysids: Vec<String>,
        cids: Vec<Cid>,
    },

    /// A store lookup failed or timed out; the mint may be retried
    #[error("Lookup failed while minting {htid}: {source}")]
    TransientLookupFailure {
        htid: String,
        #[source]
        source: LookupError,
    },
}

impl MintError {
    /// Whether retrying the same bundle may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, MintError::TransientLookupFailure { .. })
    }
}

/// Run a sqlx query under a deadline, tagging failures with their store
pub(crate) async fn bounded<T, F>(store: Store, timeout: Duration, query: F) -> Result<T, LookupError>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    match tokio::time::timeout(timeout, query).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(LookupError::Database { store, source }),
        Err(_) => Err(LookupError::Timeout {
            store,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
