use std::path::PathBuf;

use astra_utils::config::home_path;
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub db_path: PathBuf,
    /// Default row limit applied to `QueryByIndex` when the caller doesn't
    /// supply one.
    pub default_query_limit: u32,
    /// Hard ceiling on `QueryByIndex` limits, regardless of what's asked for.
    pub max_query_limit: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: home_path("records.db"),
            default_query_limit: 50,
            max_query_limit: 1000,
        }
    }
}

impl StoreConfig {
    pub fn test(suffix: &str) -> Self {
        Self {
            db_path: std::env::temp_dir().join(format!("astra-store-test-{suffix}.db")),
            ..Self::default()
        }
    }
}
