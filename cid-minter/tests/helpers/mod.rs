//! Test Helper Utilities
//!
//! Shared fixtures and log capture for the cid-minter integration tests

#![allow(dead_code)]

pub mod fixtures;
pub mod log_capture;

pub use fixtures::{
    cid, count_cache_rows, counter_value, create_cluster_db, fixture_classes, insert_record,
    ocn, seed_fixture_records, test_env, test_env_with_concordance, CountingKvStore,
    FailingKvStore, PanickingKvStore, TestEnv,
};
pub use log_capture::{LogCapture, LogRecord};
