//! Identifier and cluster ID value types
//!
//! These are the only shapes that cross the engine boundary: the identifier
//! bundle handed over by the record extractor, the OCN and CID values, and the
//! kind discriminator shared by the cluster database reader and the minter
//! cache.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use tracing::debug;

/// OCLC Control Number (always positive)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ocn(u64);

impl Ocn {
    /// Wrap a raw number, rejecting zero
    pub fn new(value: u64) -> Option<Self> {
        (value > 0).then_some(Self(value))
    }

    /// Parse a decimal OCN string
    ///
    /// Surrounding whitespace is ignored. Anything other than ASCII digits
    /// (signs, prefixes such as `ocm`, embedded spaces) is rejected, as are
    /// zero and values that overflow `u64`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        trimmed.parse::<u64>().ok().and_then(Self::new)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Ocn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cluster ID: a zero-padded decimal string
///
/// Ordering is numeric. At a fixed width that is the same as comparing the
/// strings, and it stays correct for a value wider than the configured width.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cid(String);

impl Cid {
    /// CID value the cluster database uses for records not yet clustered
    pub const UNCLUSTERED: &'static str = "0";

    /// Format a counter value as a CID padded to `width` digits
    pub fn from_number(value: u64, width: usize) -> Self {
        Self(format!("{:0width$}", value, width = width))
    }

    /// Parse a stored CID, re-padding it to `width`
    ///
    /// Leading zeros are not significant: `"00000002076"` and `"2076"` both
    /// parse to the same CID. Returns `None` for empty or non-numeric input
    /// and for the unclustered sentinel (any all-zero string).
    pub fn parse(raw: &str, width: usize) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let digits = trimmed.trim_start_matches('0');
        if digits.is_empty() {
            return None;
        }
        Some(Self(format!("{:0>width$}", digits, width = width)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value, if it fits in `u64`
    pub fn number(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl Ord for Cid {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.0.trim_start_matches('0');
        let rhs = other.0.trim_start_matches('0');
        lhs.len()
            .cmp(&rhs.len())
            .then_with(|| lhs.cmp(rhs))
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Cid {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of identifier carried on a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    /// OCLC control number
    Ocn,
    /// Contributing system id
    Sysid,
    /// Contributing system id the record carried before a migration
    PrevSysid,
}

impl IdentifierKind {
    /// Stable tag used in storage and logs
    pub fn as_str(self) -> &'static str {
        match self {
            IdentifierKind::Ocn => "ocn",
            IdentifierKind::Sysid => "sysid",
            IdentifierKind::PrevSysid => "prev_sysid",
        }
    }

    /// Kind under which the minter cache stores this identifier
    ///
    /// Previous sysids share the sysid namespace.
    pub fn cache_namespace(self) -> IdentifierKind {
        match self {
            IdentifierKind::PrevSysid => IdentifierKind::Sysid,
            other => other,
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier bundle as produced by the record extractor
///
/// List fields are comma-joined strings; any of them may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBundle {
    #[serde(default)]
    pub htid: Option<String>,
    #[serde(default)]
    pub ocns: Option<String>,
    #[serde(default)]
    pub contribsys_ids: Option<String>,
    #[serde(default)]
    pub previous_contribsys_ids: Option<String>,
}

/// Validated identifiers for one record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifierBundle {
    /// HathiTrust item id; blank or absent values are rejected at mint time
    pub htid: Option<String>,
    pub ocns: Vec<Ocn>,
    pub contribsys_ids: Vec<String>,
    pub previous_contribsys_ids: Vec<String>,
}

impl IdentifierBundle {
    /// Convert the extractor's raw strings into typed identifiers
    ///
    /// Malformed OCNs are dropped (logged at debug level) without failing
    /// the record. Duplicates are removed, keeping first-seen order.
    pub fn from_raw(raw: &RawBundle) -> Self {
        let htid = raw.htid.clone();

        let mut ocns: Vec<Ocn> = Vec::new();
        for token in split_list(raw.ocns.as_deref()) {
            match Ocn::parse(&token) {
                Some(ocn) if !ocns.contains(&ocn) => ocns.push(ocn),
                Some(_) => {}
                None => debug!(htid = ?htid, value = %token, "Discarding malformed OCN"),
            }
        }

        Self {
            htid,
            ocns,
            contribsys_ids: split_list(raw.contribsys_ids.as_deref()),
            previous_contribsys_ids: split_list(raw.previous_contribsys_ids.as_deref()),
        }
    }

    /// Trimmed htid, or `None` when absent or blank
    pub fn htid(&self) -> Option<&str> {
        self.htid.as_deref().map(str::trim).filter(|h| !h.is_empty())
    }
}

/// Split a comma-joined list, trimming entries and dropping blanks and repeats
pub fn split_list(raw: Option<&str>) -> Vec<String> {
    let mut values: Vec<String> = Vec::new();
    for part in raw.unwrap_or_default().split(',') {
        let part = part.trim();
        if !part.is_empty() && !values.iter().any(|v| v == part) {
            values.push(part.to_string());
        }
    }
    values
}

/// Dotted and undotted spellings of a contribsys id
///
/// `pur.123` and `pur123` name the same local record. The id itself always
/// comes first. Ids without a leading alphabetic campus prefix have no alias.
pub fn contribsys_aliases(id: &str) -> Vec<String> {
    let mut aliases = vec![id.to_string()];
    let alias = match id.split_once('.') {
        Some((campus, local)) if !campus.is_empty() && !local.is_empty() => {
            Some(format!("{}{}", campus, local))
        }
        Some(_) => None,
        None => {
            let prefix_len = id
                .bytes()
                .take_while(|b| b.is_ascii_alphabetic())
                .count();
            (prefix_len > 0 && prefix_len < id.len())
                .then(|| format!("{}.{}", &id[..prefix_len], &id[prefix_len..]))
        }
    };
    if let Some(alias) = alias {
        if alias != id {
            aliases.push(alias);
        }
    }
    aliases
}

/// Dotted form of a contribsys id, used to compare lineages
pub fn canonical_contribsys_id(id: &str) -> String {
    if id.contains('.') {
        return id.to_string();
    }
    contribsys_aliases(id)
        .into_iter()
        .find(|alias| alias.contains('.'))
        .unwrap_or_else(|| id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ocn_parse() {
        assert_eq!(Ocn::parse("33393343").map(Ocn::get), Some(33393343));
        assert_eq!(Ocn::parse("  140869 ").map(Ocn::get), Some(140869));
        assert_eq!(Ocn::parse("0"), None);
        assert_eq!(Ocn::parse(""), None);
        assert_eq!(Ocn::parse("-5"), None);
        assert_eq!(Ocn::parse("ocm123"), None);
        assert_eq!(Ocn::parse("12 34"), None);
        assert_eq!(Ocn::parse("99999999999999999999999"), None);
    }

    #[test]
    fn test_cid_padding_and_parse() {
        assert_eq!(Cid::from_number(2076, 9).as_str(), "000002076");
        assert_eq!(Cid::from_number(2076, 11).as_str(), "00000002076");
        assert_eq!(Cid::parse("2076", 9).unwrap().as_str(), "000002076");
        assert_eq!(Cid::parse("009547317", 9).unwrap().as_str(), "009547317");
        assert_eq!(Cid::parse("0", 9), None);
        assert_eq!(Cid::parse("000000000", 9), None);
        assert_eq!(Cid::parse("abc", 9), None);
        assert_eq!(Cid::parse("", 9), None);
    }

    #[test]
    fn test_cid_parse_ignores_stored_width() {
        let narrow = Cid::parse("000002076", 9).unwrap();
        let wide = Cid::parse("00000002076", 9).unwrap();
        assert_eq!(wide, narrow);
        assert_eq!(wide.as_str(), "000002076");

        let set: std::collections::BTreeSet<Cid> = [narrow, wide].into_iter().collect();
        assert_eq!(set.len(), 1);

        // A value that outgrew the width keeps its digits
        assert_eq!(Cid::parse("01000000000", 9).unwrap().as_str(), "1000000000");
    }

    #[test]
    fn test_cid_ordering_is_numeric() {
        let small = Cid::from_number(2076, 9);
        let large = Cid::from_number(102337772, 9);
        assert!(small < large);

        // A value that outgrew the width still sorts after narrower values
        let wide = Cid::from_number(1_000_000_000, 9);
        assert_eq!(wide.as_str(), "1000000000");
        assert!(large < wide);

        let cids = vec![large.clone(), small.clone(), wide.clone()];
        assert_eq!(cids.iter().min(), Some(&small));
    }

    #[test]
    fn test_cache_namespace() {
        assert_eq!(IdentifierKind::PrevSysid.cache_namespace(), IdentifierKind::Sysid);
        assert_eq!(IdentifierKind::Sysid.cache_namespace(), IdentifierKind::Sysid);
        assert_eq!(IdentifierKind::Ocn.cache_namespace(), IdentifierKind::Ocn);
    }

    #[test]
    fn test_bundle_from_raw_drops_malformed_ocns() {
        let raw = RawBundle {
            htid: Some("mdp.39015000000001".to_string()),
            ocns: Some("140869, 2094039,abc,,0,140869".to_string()),
            contribsys_ids: Some("miu.990001, miu.990001,pur123".to_string()),
            previous_contribsys_ids: None,
        };

        let bundle = IdentifierBundle::from_raw(&raw);
        let ocns: Vec<u64> = bundle.ocns.iter().map(|o| o.get()).collect();
        assert_eq!(ocns, vec![140869, 2094039]);
        assert_eq!(bundle.contribsys_ids, vec!["miu.990001", "pur123"]);
        assert!(bundle.previous_contribsys_ids.is_empty());
        assert_eq!(bundle.htid(), Some("mdp.39015000000001"));
    }

    #[test]
    fn test_blank_htid_is_absent() {
        for htid in [None, Some(""), Some("   ")] {
            let bundle = IdentifierBundle {
                htid: htid.map(str::to_string),
                ..Default::default()
            };
            assert_eq!(bundle.htid(), None);
        }
    }

    #[test]
    fn test_contribsys_aliases() {
        assert_eq!(contribsys_aliases("pur.123"), vec!["pur.123", "pur123"]);
        assert_eq!(contribsys_aliases("pur123"), vec!["pur123", "pur.123"]);
        assert_eq!(contribsys_aliases("12345"), vec!["12345"]);
        assert_eq!(contribsys_aliases("miu"), vec!["miu"]);
        assert_eq!(contribsys_aliases("pur."), vec!["pur."]);

        assert_eq!(canonical_contribsys_id("pur123"), "pur.123");
        assert_eq!(canonical_contribsys_id("pur.123"), "pur.123");
        assert_eq!(canonical_contribsys_id("12345"), "12345");
    }
}
