//! Shared test utilities.
//!
//! This module provides helpers for setting up throwaway stores in temporary
//! directories and for seeding collections with records.

use crate::config::StoreConfig;
use crate::store::{KeyPath, Record, RecordStore};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("trace")), // Default to TRACE for tests if RUST_LOG is not set
        )
        .with_test_writer() // Crucial for `cargo test` output
        .try_init(); // Use try_init to avoid panic if already initialized
}

/// Opens a store with the default collections in a fresh temporary directory.
///
/// The `TempDir` must be kept alive for as long as the store is used.
#[allow(clippy::expect_used)]
pub async fn setup_test_store() -> (TempDir, RecordStore) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let store = RecordStore::open(&StoreConfig::with_data_dir(dir.path()))
        .await
        .expect("open test store");
    (dir, store)
}

/// Writes each `(key, record)` pair into `collection`.
#[allow(clippy::expect_used)]
pub async fn seed<K>(store: &RecordStore, collection: &str, records: Vec<(K, Record)>)
where
    K: Into<KeyPath>,
{
    for (key, record) in records {
        store
            .set(collection, key, record)
            .await
            .expect("seed record");
    }
}
