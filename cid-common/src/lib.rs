//! # CID Minter Common Library
//!
//! Shared code for the cluster ID minting engine and its tooling:
//! - Identifier and CID value types
//! - TOML bootstrap configuration
//! - SQLite pool opening and schema creation

pub mod config;
pub mod db;
pub mod error;
pub mod identifiers;

pub use error::{Error, Result};
pub use identifiers::{Cid, IdentifierBundle, IdentifierKind, Ocn, RawBundle};
