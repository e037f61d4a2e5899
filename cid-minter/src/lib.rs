//! # CID Minting Engine
//!
//! Assigns stable cluster IDs (CIDs) to bibliographic records from their
//! OCLC numbers and contributing-system ids.
//!
//! **Components:**
//! - `concordance`: OCLC OCN equivalence classes from two key-value indices
//! - `cluster_db`: read-only queries against the canonical cluster database
//! - `minter_cache`: local resolution memo and the CID counter
//! - `orchestrator`: the resolution chain that picks or mints a CID
//! - `batch`: concurrent minting of many records

pub mod batch;
pub mod cluster_db;
pub mod concordance;
pub mod context;
pub mod error;
pub mod minter_cache;
pub mod orchestrator;

pub use batch::{mint_batch, read_bundles, BatchError, BatchOutcome, BatchStats};
pub use cluster_db::{CidOcnPair, CidSysidPair, ClusterDbReader};
pub use concordance::{ConcordanceResolver, KvStore, MemoryKvStore, SqliteKvStore};
pub use context::EngineContext;
pub use error::{LookupError, MintError, Store};
pub use minter_cache::{CacheLookup, LocalMinterCache, WriteOutcome};
pub use orchestrator::{CidMinter, MintReport, MintWarning, Resolution};
