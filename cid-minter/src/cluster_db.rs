//! Cluster database reader
//!
//! Read-only queries against the canonical records store: which clusters
//! already claim a set of OCNs or contribsys ids, and the full membership of
//! a set of clusters. Records whose CID is `'0'` are not clustered yet and
//! never match.

use crate::error::{bounded, LookupError, Store};
use cid_common::identifiers::contribsys_aliases;
use cid_common::{Cid, IdentifierKind, Ocn};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::warn;

/// Bound parameters per IN-list query
const IN_LIST_CHUNK: usize = 500;

/// A cluster claiming an OCN
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CidOcnPair {
    pub cid: Cid,
    pub ocn: Ocn,
}

/// A cluster claiming a contribsys id
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CidSysidPair {
    pub cid: Cid,
    pub contribsys_id: String,
}

/// Row type returned by the cluster queries
pub trait CidPair {
    type Value: Clone;

    fn cid(&self) -> &Cid;
    fn value(&self) -> &Self::Value;
}

impl CidPair for CidOcnPair {
    type Value = Ocn;

    fn cid(&self) -> &Cid {
        &self.cid
    }

    fn value(&self) -> &Ocn {
        &self.ocn
    }
}

impl CidPair for CidSysidPair {
    type Value = String;

    fn cid(&self) -> &Cid {
        &self.cid
    }

    fn value(&self) -> &String {
        &self.contribsys_id
    }
}

/// Group query rows by cluster
pub fn group_by_cid<P: CidPair>(pairs: &[P]) -> BTreeMap<Cid, Vec<P::Value>> {
    let mut groups: BTreeMap<Cid, Vec<P::Value>> = BTreeMap::new();
    for pair in pairs {
        groups
            .entry(pair.cid().clone())
            .or_default()
            .push(pair.value().clone());
    }
    groups
}

/// Distinct clusters among query rows
pub fn distinct_cids<P: CidPair>(pairs: &[P]) -> BTreeSet<Cid> {
    pairs.iter().map(|p| p.cid().clone()).collect()
}

/// Read access to the cluster database
#[derive(Clone)]
pub struct ClusterDbReader {
    pool: SqlitePool,
    cid_width: usize,
    timeout: Duration,
}

impl ClusterDbReader {
    pub fn new(pool: SqlitePool, cid_width: usize, timeout: Duration) -> Self {
        Self {
            pool,
            cid_width,
            timeout,
        }
    }

    /// Clusters claiming any of `ocns`
    pub async fn find_clusters_by_ocns(&self, ocns: &[Ocn]) -> Result<Vec<CidOcnPair>, LookupError> {
        let values: Vec<String> = ocns.iter().map(Ocn::to_string).collect();
        let rows = self
            .fetch_pairs(
                "SELECT DISTINCT r.cid, i.value FROM records r \
                 JOIN identifiers i ON i.record_id = r.id \
                 WHERE i.type = 'ocn' AND r.cid <> '0' AND i.value IN (",
                &values,
            )
            .await?;
        Ok(self.ocn_pairs(rows))
    }

    /// Full OCN membership of `cids`
    pub async fn find_clusters_by_cids(&self, cids: &[Cid]) -> Result<Vec<CidOcnPair>, LookupError> {
        let values: Vec<String> = cids.iter().map(|c| c.as_str().to_string()).collect();
        let rows = self
            .fetch_pairs(
                "SELECT DISTINCT r.cid, i.value FROM records r \
                 JOIN identifiers i ON i.record_id = r.id \
                 WHERE i.type = 'ocn' AND r.cid IN (",
                &values,
            )
            .await?;
        Ok(self.ocn_pairs(rows))
    }

    /// Clusters claiming any of `ids`, trying dotted and undotted spellings
    pub async fn find_by_contribsys_ids(
        &self,
        ids: &[String],
    ) -> Result<Vec<CidSysidPair>, LookupError> {
        let mut values: Vec<String> = Vec::new();
        for id in ids {
            for alias in contribsys_aliases(id) {
                if !values.contains(&alias) {
                    values.push(alias);
                }
            }
        }
        let rows = self
            .fetch_pairs(
                "SELECT DISTINCT cid, contribsys_id FROM records \
                 WHERE cid <> '0' AND contribsys_id IN (",
                &values,
            )
            .await?;
        Ok(self.sysid_pairs(rows))
    }

    /// Full contribsys membership of `cids`
    pub async fn find_contribsys_ids_by_cids(
        &self,
        cids: &[Cid],
    ) -> Result<Vec<CidSysidPair>, LookupError> {
        let values: Vec<String> = cids.iter().map(|c| c.as_str().to_string()).collect();
        let rows = self
            .fetch_pairs(
                "SELECT DISTINCT cid, contribsys_id FROM records \
                 WHERE contribsys_id IS NOT NULL AND cid IN (",
                &values,
            )
            .await?;
        Ok(self.sysid_pairs(rows))
    }

    /// Current cluster of a record, `None` if unknown or not clustered
    pub async fn find_cid_by_htid(&self, htid: &str) -> Result<Option<Cid>, LookupError> {
        let cid: Option<String> = bounded(
            Store::ClusterDb,
            self.timeout,
            sqlx::query_scalar("SELECT cid FROM records WHERE htid = ?")
                .bind(htid)
                .fetch_optional(&self.pool),
        )
        .await?;

        Ok(cid.and_then(|c| Cid::parse(&c, self.cid_width)))
    }

    /// Highest cluster number in use
    pub async fn max_cid(&self) -> Result<Option<u64>, LookupError> {
        let max: Option<i64> = bounded(
            Store::ClusterDb,
            self.timeout,
            sqlx::query_scalar("SELECT MAX(CAST(cid AS INTEGER)) FROM records WHERE cid <> '0'")
                .fetch_one(&self.pool),
        )
        .await?;

        Ok(max.filter(|m| *m > 0).map(|m| m as u64))
    }

    /// Run `prefix` + bound IN-list + `)` over `values` in chunks
    async fn fetch_pairs(
        &self,
        prefix: &str,
        values: &[String],
    ) -> Result<Vec<(String, String)>, LookupError> {
        let mut rows: Vec<(String, String)> = Vec::new();

        for chunk in values.chunks(IN_LIST_CHUNK) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(prefix);
            let mut separated = builder.separated(", ");
            for value in chunk {
                separated.push_bind(value.clone());
            }
            separated.push_unseparated(")");

            let batch = bounded(
                Store::ClusterDb,
                self.timeout,
                builder
                    .build_query_as::<(String, String)>()
                    .fetch_all(&self.pool),
            )
            .await?;
            rows.extend(batch);
        }

        rows.sort();
        rows.dedup();
        Ok(rows)
    }

    fn ocn_pairs(&self, rows: Vec<(String, String)>) -> Vec<CidOcnPair> {
        let mut pairs: Vec<CidOcnPair> = rows
            .into_iter()
            .filter_map(|(cid, value)| {
                let parsed_cid = Cid::parse(&cid, self.cid_width);
                let parsed_ocn = Ocn::parse(&value);
                match (parsed_cid, parsed_ocn) {
                    (Some(cid), Some(ocn)) => Some(CidOcnPair { cid, ocn }),
                    _ => {
                        warn!(
                            cid = %cid,
                            value = %value,
                            kind = %IdentifierKind::Ocn,
                            "Skipping unusable cluster database row"
                        );
                        None
                    }
                }
            })
            .collect();
        pairs.sort();
        pairs.dedup();
        pairs
    }

    fn sysid_pairs(&self, rows: Vec<(String, String)>) -> Vec<CidSysidPair> {
        let mut pairs: Vec<CidSysidPair> = rows
            .into_iter()
            .filter_map(|(cid, contribsys_id)| match Cid::parse(&cid, self.cid_width) {
                Some(cid) => Some(CidSysidPair { cid, contribsys_id }),
                None => {
                    warn!(cid = %cid, contribsys_id = %contribsys_id, "Skipping row with unusable cid");
                    None
                }
            })
            .collect();
        pairs.sort();
        pairs.dedup();
        pairs
    }
}
