//! Batch minting
//!
//! Mints many bundles concurrently against one engine context. Results come
//! back in input order regardless of completion order.

use crate::error::MintError;
use crate::orchestrator::{CidMinter, MintReport, Resolution};
use cid_common::{Cid, Error, IdentifierBundle, RawBundle, Result};
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::Semaphore;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Failure of one bundle of a batch
#[derive(Debug, Error)]
pub enum BatchError {
    #[error(transparent)]
    Mint(#[from] MintError),

    /// The mint task panicked or was cancelled before reporting
    #[error("Mint task for {htid} did not complete")]
    TaskAborted { htid: String },
}

/// Result of minting one bundle of a batch
#[derive(Debug)]
pub struct BatchOutcome {
    /// htid as given, empty when the bundle had none
    pub htid: String,
    pub result: std::result::Result<MintReport, BatchError>,
}

impl BatchOutcome {
    pub fn cid(&self) -> Option<&Cid> {
        self.result.as_ref().ok().map(|report| &report.cid)
    }
}

/// Summary counts of a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub minted: usize,
    pub from_cache: usize,
    pub from_cluster_db: usize,
    pub failed: usize,
}

impl BatchStats {
    pub fn from_outcomes(outcomes: &[BatchOutcome]) -> Self {
        let mut stats = BatchStats::default();
        for outcome in outcomes {
            match &outcome.result {
                Ok(report) => match report.resolution {
                    Resolution::Minted => stats.minted += 1,
                    Resolution::LocalCache(_) => stats.from_cache += 1,
                    Resolution::ClusterDb(_) => stats.from_cluster_db += 1,
                },
                Err(_) => stats.failed += 1,
            }
        }
        stats
    }

    pub fn total(&self) -> usize {
        self.minted + self.from_cache + self.from_cluster_db + self.failed
    }
}

/// Mint every bundle with at most `concurrency` mints in flight
///
/// Returns exactly one outcome per bundle, in input order.
pub async fn mint_batch(
    minter: &CidMinter,
    bundles: Vec<IdentifierBundle>,
    concurrency: usize,
) -> Vec<BatchOutcome> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut join_set = JoinSet::new();
    let htids: Vec<String> = bundles
        .iter()
        .map(|b| b.htid().unwrap_or_default().to_string())
        .collect();

    for (index, bundle) in bundles.into_iter().enumerate() {
        let minter = minter.clone();
        let permits = Arc::clone(&permits);
        join_set.spawn(async move {
            // The semaphore is never closed
            let _permit = permits.acquire_owned().await.ok();
            (index, minter.mint(&bundle).await)
        });
    }

    let mut slots: Vec<Option<std::result::Result<MintReport, MintError>>> =
        htids.iter().map(|_| None).collect();
    let mut aborted = 0usize;
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, result)) => {
                if let Err(e) = &result {
                    warn!(htid = %htids[index], error = %e, transient = e.is_transient(), "Mint failed");
                }
                slots[index] = Some(result);
            }
            Err(e) => {
                aborted += 1;
                warn!(error = %e, "Mint task did not complete");
            }
        }
    }

    let outcomes: Vec<BatchOutcome> = htids
        .into_iter()
        .zip(slots)
        .map(|(htid, slot)| {
            let result = match slot {
                Some(result) => result.map_err(BatchError::from),
                None => Err(BatchError::TaskAborted { htid: htid.clone() }),
            };
            BatchOutcome { htid, result }
        })
        .collect();
    debug!(bundles = outcomes.len(), aborted, "Batch finished");
    outcomes
}

/// Parse JSON Lines of raw bundles; blank lines are skipped
pub fn read_bundles<R: BufRead>(reader: R) -> Result<Vec<IdentifierBundle>> {
    let mut bundles = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let raw: RawBundle = serde_json::from_str(&line)
            .map_err(|e| Error::InvalidInput(format!("line {}: {}", index + 1, e)))?;
        bundles.push(IdentifierBundle::from_raw(&raw));
    }

    Ok(bundles)
}
