//! SQLite pools and schema for the engine's stores

pub mod init;

pub use init::*;
