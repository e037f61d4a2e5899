//! CID minting orchestrator
//!
//! Assigns one cluster ID to an identifier bundle. Sources are tried in a
//! fixed order, each first through the local cache and then against the
//! authoritative stores:
//!
//! 1. OCNs, expanded through the OCLC concordance
//! 2. Contribsys ids
//! 3. Previous contribsys ids
//! 4. A freshly minted CID
//!
//! Ambiguity is settled by taking the smallest candidate CID and logging a
//! warning. The exceptions are previous contribsys ids that point at more
//! than one cluster, which reject the record, and clusters whose records
//! disagree on contribsys lineage, which are never extended.
//!
//! Minting a new CID is serialized across clones of one `CidMinter`: the
//! cache is probed again under the mint lock, so concurrent records of the
//! same new work share the CID the first of them minted.

use crate::cluster_db::{distinct_cids, group_by_cid, CidPair};
use crate::context::EngineContext;
use crate::error::{LookupError, MintError};
use crate::minter_cache::{CacheLookup, WriteOutcome};
use cid_common::identifiers::canonical_contribsys_id;
use cid_common::{Cid, IdentifierBundle, IdentifierKind, Ocn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Where the CID of a mint came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Earlier resolution memoized in the local cache
    LocalCache(IdentifierKind),
    /// Existing cluster found in the cluster database
    ClusterDb(IdentifierKind),
    /// New CID drawn from the counter
    Minted,
}

/// Non-fatal condition met while minting; each one is also logged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MintWarning {
    /// Several clusters matched; the minimum was chosen
    AmbiguousMatch {
        kind: IdentifierKind,
        candidates: Vec<Cid>,
        chosen: Cid,
    },
    /// The OCNs span several OCLC classes although one cluster matched
    OcnsSpanClasses { classes: usize, cid: Cid },
    /// Cached identifiers disagreed; the cache was bypassed
    CacheConflict { kind: IdentifierKind, cids: Vec<Cid> },
    /// Matched cluster mixes contribsys lineages and was not extended
    HeterogeneousClusterRejected {
        kind: IdentifierKind,
        cid: Cid,
        contribsys_ids: Vec<String>,
    },
}

/// Outcome of a successful mint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintReport {
    pub htid: String,
    pub cid: Cid,
    pub resolution: Resolution,
    /// Cluster the record belonged to before this mint, if any
    pub previous_cid: Option<Cid>,
    pub warnings: Vec<MintWarning>,
}

impl MintReport {
    /// Whether the record now belongs to a different cluster than before
    pub fn cluster_changed(&self) -> bool {
        self.previous_cid.as_ref().is_some_and(|prev| *prev != self.cid)
    }
}

/// Assigns CIDs to identifier bundles
#[derive(Clone)]
pub struct CidMinter {
    ctx: EngineContext,
    /// Held from the last cache probe until a new CID is written back
    mint_lock: Arc<Mutex<()>>,
}

impl CidMinter {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            mint_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Resolve or mint the CID for one record
    ///
    /// # Errors
    /// - `MissingHtid` when the htid is absent or blank
    /// - `AmbiguousPreviousSysid` when previous sysids match distinct clusters
    /// - `TransientLookupFailure` when any store query fails or times out
    ///
    /// Nothing is written to the cache or counter when an error is returned
    /// before a CID is obtained.
    pub async fn mint(&self, bundle: &IdentifierBundle) -> Result<MintReport, MintError> {
        let htid = bundle.htid().ok_or(MintError::MissingHtid)?;
        let mut run = MintRun::new(&self.ctx, htid);

        let previous_cid = self
            .ctx
            .cluster_db
            .find_cid_by_htid(htid)
            .await
            .map_err(|e| run.lookup_failed(e))?;

        let mut resolved = None;
        if !bundle.ocns.is_empty() {
            resolved = run.resolve_by_ocns(&bundle.ocns).await?;
        }
        if resolved.is_none() && !bundle.contribsys_ids.is_empty() {
            resolved = run
                .resolve_by_sysid(IdentifierKind::Sysid, &bundle.contribsys_ids)
                .await?;
        }
        if resolved.is_none() && !bundle.previous_contribsys_ids.is_empty() {
            resolved = run
                .resolve_by_sysid(IdentifierKind::PrevSysid, &bundle.previous_contribsys_ids)
                .await?;
        }

        let (cid, resolution) = match resolved {
            Some(found) => {
                run.write_back(bundle, &found.0).await?;
                found
            }
            None => {
                let _guard = self.mint_lock.lock().await;
                let found = match run.reprobe_cache(bundle).await? {
                    Some(found) => found,
                    None => {
                        let cid = self.ctx.cache.mint_next().await.map_err(|e| run.lookup_failed(e))?;
                        info!(htid = %htid, cid = %cid, "Minted new CID");
                        (cid, Resolution::Minted)
                    }
                };
                run.write_back(bundle, &found.0).await?;
                found
            }
        };

        if let Some(prev) = previous_cid.as_ref().filter(|prev| **prev != cid) {
            info!(htid = %htid, from = %prev, to = %cid, "Record moves to a different cluster");
        }
        debug!(htid = %htid, cid = %cid, resolution = ?resolution, "Mint complete");

        Ok(MintReport {
            htid: htid.to_string(),
            cid,
            resolution,
            previous_cid,
            warnings: run.warnings,
        })
    }
}

/// State of one `mint` call
struct MintRun<'a> {
    ctx: &'a EngineContext,
    htid: &'a str,
    warnings: Vec<MintWarning>,
    /// Concordance expansion of the bundle's OCNs, once computed
    expanded_ocns: BTreeSet<Ocn>,
    /// Clusters claiming each expanded OCN
    ocn_claims: BTreeMap<Ocn, BTreeSet<Cid>>,
}

impl<'a> MintRun<'a> {
    fn new(ctx: &'a EngineContext, htid: &'a str) -> Self {
        Self {
            ctx,
            htid,
            warnings: Vec::new(),
            expanded_ocns: BTreeSet::new(),
            ocn_claims: BTreeMap::new(),
        }
    }

    fn lookup_failed(&self, source: LookupError) -> MintError {
        warn!(htid = %self.htid, error = %source, "Lookup failed during mint");
        MintError::TransientLookupFailure {
            htid: self.htid.to_string(),
            source,
        }
    }

    /// Probe the cache; a conflict is recorded and treated as a miss
    async fn probe_cache(
        &mut self,
        kind: IdentifierKind,
        identifiers: &[String],
    ) -> Result<Option<Cid>, MintError> {
        let lookup = self
            .ctx
            .cache
            .lookup(kind, identifiers)
            .await
            .map_err(|e| self.lookup_failed(e))?;

        match lookup {
            CacheLookup::Hit(cid) => Ok(Some(cid)),
            CacheLookup::Miss => Ok(None),
            CacheLookup::Conflict(cids) => {
                warn!(
                    htid = %self.htid,
                    kind = %kind,
                    cids = %join_cids(&cids),
                    "Cached identifiers disagree; resolving from authoritative stores"
                );
                self.warnings.push(MintWarning::CacheConflict { kind, cids });
                Ok(None)
            }
        }
    }

    /// Probe the cache again once the resolution chain came up empty
    ///
    /// Another mint of the same work may have written its CID since the
    /// first probe. Conflicts count as misses; they were reported already.
    async fn reprobe_cache(
        &self,
        bundle: &IdentifierBundle,
    ) -> Result<Option<(Cid, Resolution)>, MintError> {
        let mut ocns: BTreeSet<Ocn> = bundle.ocns.iter().copied().collect();
        ocns.extend(self.expanded_ocns.iter().copied());
        let ocn_keys: Vec<String> = ocns.iter().map(Ocn::to_string).collect();

        let probes = [
            (IdentifierKind::Ocn, ocn_keys.as_slice()),
            (IdentifierKind::Sysid, bundle.contribsys_ids.as_slice()),
            (IdentifierKind::PrevSysid, bundle.previous_contribsys_ids.as_slice()),
        ];
        for (kind, identifiers) in probes {
            if identifiers.is_empty() {
                continue;
            }
            let lookup = self
                .ctx
                .cache
                .lookup(kind, identifiers)
                .await
                .map_err(|e| self.lookup_failed(e))?;
            if let CacheLookup::Hit(cid) = lookup {
                debug!(htid = %self.htid, kind = %kind, cid = %cid, "Concurrent mint already assigned a CID");
                return Ok(Some((cid, Resolution::LocalCache(kind))));
            }
        }
        Ok(None)
    }

    async fn resolve_by_ocns(&mut self, ocns: &[Ocn]) -> Result<Option<(Cid, Resolution)>, MintError> {
        let keys: Vec<String> = ocns.iter().map(Ocn::to_string).collect();
        if let Some(cid) = self.probe_cache(IdentifierKind::Ocn, &keys).await? {
            debug!(htid = %self.htid, cid = %cid, "OCNs resolved from cache");
            return Ok(Some((cid, Resolution::LocalCache(IdentifierKind::Ocn))));
        }

        let classes = self
            .ctx
            .concordance
            .expand_many(ocns)
            .await
            .map_err(|e| self.lookup_failed(e))?;

        let mut expanded: BTreeSet<Ocn> = ocns.iter().copied().collect();
        for class in &classes {
            expanded.extend(class.iter().copied());
        }
        let expanded_list: Vec<Ocn> = expanded.iter().copied().collect();
        debug!(
            htid = %self.htid,
            ocns = ocns.len(),
            classes = classes.len(),
            expanded = expanded_list.len(),
            "Expanded OCNs through concordance"
        );

        let pairs = self
            .ctx
            .cluster_db
            .find_clusters_by_ocns(&expanded_list)
            .await
            .map_err(|e| self.lookup_failed(e))?;

        self.expanded_ocns = expanded;
        for pair in &pairs {
            self.ocn_claims
                .entry(pair.ocn)
                .or_default()
                .insert(pair.cid.clone());
        }

        let cid_set = distinct_cids(&pairs);
        if cid_set.is_empty() {
            return Ok(None);
        }

        let cid_list: Vec<Cid> = cid_set.iter().cloned().collect();
        let members = self
            .ctx
            .cluster_db
            .find_clusters_by_cids(&cid_list)
            .await
            .map_err(|e| self.lookup_failed(e))?;
        for (cid, cluster_ocns) in group_by_cid(&members) {
            debug!(htid = %self.htid, cid = %cid, ocns = cluster_ocns.len(), "Candidate cluster membership");
        }

        let chosen = self.choose_min(IdentifierKind::Ocn, &cid_list);
        if cid_list.len() == 1 && classes.len() > 1 {
            warn!(
                htid = %self.htid,
                cid = %chosen,
                classes = classes.len(),
                "OCNs span several OCLC clusters but match a single CID"
            );
            self.warnings.push(MintWarning::OcnsSpanClasses {
                classes: classes.len(),
                cid: chosen.clone(),
            });
        }

        Ok(Some((chosen, Resolution::ClusterDb(IdentifierKind::Ocn))))
    }

    async fn resolve_by_sysid(
        &mut self,
        kind: IdentifierKind,
        ids: &[String],
    ) -> Result<Option<(Cid, Resolution)>, MintError> {
        if let Some(cid) = self.probe_cache(kind, ids).await? {
            debug!(htid = %self.htid, kind = %kind, cid = %cid, "Sysids resolved from cache");
            return Ok(Some((cid, Resolution::LocalCache(kind))));
        }

        let pairs = self
            .ctx
            .cluster_db
            .find_by_contribsys_ids(ids)
            .await
            .map_err(|e| self.lookup_failed(e))?;

        let cid_list: Vec<Cid> = distinct_cids(&pairs).into_iter().collect();
        if cid_list.is_empty() {
            return Ok(None);
        }

        if kind == IdentifierKind::PrevSysid && cid_list.len() > 1 {
            warn!(
                htid = %self.htid,
                sysids = %ids.join(","),
                cids = %join_cids(&cid_list),
                "Previous contribsys ids match distinct clusters"
            );
            return Err(MintError::AmbiguousPreviousSysid {
                htid: self.htid.to_string(),
                sysids: ids.to_vec(),
                cids: cid_list,
            });
        }

        let chosen = self.choose_min(kind, &cid_list);
        if self.cluster_is_heterogeneous(kind, &chosen).await? {
            return Ok(None);
        }

        Ok(Some((chosen, Resolution::ClusterDb(kind))))
    }

    /// Whether the cluster's records come from more than one contribsys lineage
    async fn cluster_is_heterogeneous(&mut self, kind: IdentifierKind, cid: &Cid) -> Result<bool, MintError> {
        let members = self
            .ctx
            .cluster_db
            .find_contribsys_ids_by_cids(std::slice::from_ref(cid))
            .await
            .map_err(|e| self.lookup_failed(e))?;

        let lineages: BTreeSet<String> = members
            .iter()
            .map(|pair| canonical_contribsys_id(pair.value()))
            .collect();
        if lineages.len() <= 1 {
            return Ok(false);
        }

        let contribsys_ids: Vec<String> = lineages.into_iter().collect();
        warn!(
            htid = %self.htid,
            kind = %kind,
            cid = %cid,
            contribsys_ids = %contribsys_ids.join(","),
            "Rejecting match against heterogeneous cluster"
        );
        self.warnings.push(MintWarning::HeterogeneousClusterRejected {
            kind,
            cid: cid.clone(),
            contribsys_ids,
        });
        Ok(true)
    }

    /// Smallest candidate; more than one candidate is logged and recorded
    fn choose_min(&mut self, kind: IdentifierKind, candidates: &[Cid]) -> Cid {
        let mut sorted = candidates.to_vec();
        sorted.sort();
        let chosen = sorted[0].clone();

        if sorted.len() > 1 {
            warn!(
                htid = %self.htid,
                kind = %kind,
                candidates = %join_cids(&sorted),
                chosen = %chosen,
                "Multiple clusters matched; choosing the minimum CID"
            );
            self.warnings.push(MintWarning::AmbiguousMatch {
                kind,
                candidates: sorted,
                chosen: chosen.clone(),
            });
        }
        chosen
    }

    /// Memoize every identifier of the bundle under `cid`
    ///
    /// Concordance siblings of the bundle's OCNs are memoized too, unless the
    /// cluster database assigns them to another cluster.
    async fn write_back(&self, bundle: &IdentifierBundle, cid: &Cid) -> Result<(), MintError> {
        let mut entries: Vec<(IdentifierKind, String)> = Vec::new();

        for ocn in &bundle.ocns {
            entries.push((IdentifierKind::Ocn, ocn.to_string()));
        }
        for ocn in &self.expanded_ocns {
            if bundle.ocns.contains(ocn) {
                continue;
            }
            let claimed_elsewhere = self
                .ocn_claims
                .get(ocn)
                .is_some_and(|claims| !claims.contains(cid));
            if !claimed_elsewhere {
                entries.push((IdentifierKind::Ocn, ocn.to_string()));
            }
        }
        for id in &bundle.contribsys_ids {
            entries.push((IdentifierKind::Sysid, id.clone()));
        }
        for id in &bundle.previous_contribsys_ids {
            entries.push((IdentifierKind::PrevSysid, id.clone()));
        }

        let mut changed = 0usize;
        for (kind, identifier) in &entries {
            let outcome = self
                .ctx
                .cache
                .write_through(*kind, identifier, cid)
                .await
                .map_err(|e| self.lookup_failed(e))?;
            if outcome != WriteOutcome::Unchanged {
                changed += 1;
            }
        }

        debug!(htid = %self.htid, cid = %cid, entries = entries.len(), changed, "Cache write-back");
        Ok(())
    }
}

fn join_cids(cids: &[Cid]) -> String {
    cids.iter().map(Cid::as_str).collect::<Vec<_>>().join(",")
}
