//! Store location configuration.
//!
//! The data directory comes from `STORE_DATA_DIR` when set, then from the
//! `data_dir` entry of the config file, and falls back to `./data`.

use std::path::PathBuf;

/// Default directory holding one JSON file per collection.
pub const DEFAULT_DATA_DIR: &str = "data";

/// Default location of the collection declarations file.
pub const DEFAULT_CONFIG_PATH: &str = "store.toml";

/// Gets the data directory override from the environment, if any.
#[must_use]
pub fn data_dir_from_env() -> Option<PathBuf> {
    std::env::var("STORE_DATA_DIR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

/// Gets the path of the collection declarations file.
///
/// Reads `STORE_CONFIG` and falls back to `./store.toml`.
#[must_use]
pub fn config_path() -> PathBuf {
    std::env::var("STORE_CONFIG")
        .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}
