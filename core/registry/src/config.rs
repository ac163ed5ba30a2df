use std::path::PathBuf;

use astra_utils::config::home_path;
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub db_path: PathBuf,
    /// When true, a peer absent from the registry is rejected at dial and
    /// after handshake instead of being implicitly created on connect.
    pub strict_mode: bool,
    pub base_messages_per_second: f64,
    pub base_messages_per_minute: f64,
    pub base_burst: f64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            db_path: home_path("peers.db"),
            strict_mode: false,
            base_messages_per_second: 50.0,
            base_messages_per_minute: 1_000.0,
            base_burst: 100.0,
        }
    }
}

impl RegistryConfig {
    pub fn test(suffix: &str) -> Self {
        Self {
            db_path: std::env::temp_dir().join(format!("astra-registry-test-{suffix}.db")),
            ..Self::default()
        }
    }
}
