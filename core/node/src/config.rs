use std::path::PathBuf;
use std::time::Duration;

use astra_exchange::ExchangeConfig;
use astra_identity::IdentityConfig;
use astra_registry::RegistryConfig;
use astra_store::StoreConfig;
use astra_types::TipQueueConfig;
use serde::{Deserialize, Serialize};

/// Configuration for the optional sandboxed plugin module. Disabled by
/// default: a deployment with no plugin configured simply runs without
/// deep validation or plugin-backed mnemonic generation.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginLoadConfig {
    pub enabled: bool,
    pub module_path: PathBuf,
    /// Raw 32-byte signing private key handed to the module verbatim.
    pub signing_priv: Vec<u8>,
    /// Raw 65-byte uncompressed signing public key handed to the module
    /// verbatim.
    pub signing_pub: Vec<u8>,
    pub secret: Vec<u8>,
    pub domains: Vec<String>,
    pub epoch_period_ms: u64,
    pub max_skew_ms: u64,
    pub lease_ms: u64,
}

impl Default for PluginLoadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            module_path: PathBuf::new(),
            signing_priv: Vec::new(),
            signing_pub: Vec::new(),
            secret: Vec::new(),
            domains: Vec::new(),
            epoch_period_ms: 60_000,
            max_skew_ms: 5_000,
            lease_ms: 3_600_000,
        }
    }
}

/// Bounded deadline applied to each step of the shutdown sequence in
/// §5: stop accepting, cancel, drain, close the plugin runtime, close
/// the store. Exceeding a step's deadline logs a warning and moves on
/// regardless -- shutdown never hangs indefinitely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    #[serde(with = "humantime_serde")]
    pub drain_deadline: Duration,
    #[serde(with = "humantime_serde")]
    pub plugin_close_deadline: Duration,
    #[serde(with = "humantime_serde")]
    pub store_close_deadline: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_deadline: Duration::from_secs(10),
            plugin_close_deadline: Duration::from_secs(5),
            store_close_deadline: Duration::from_secs(5),
        }
    }
}

/// Aggregate configuration for every subsystem the node owns. Each field
/// is independently defaultable so a deployment only overrides what it
/// needs to.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub identity: IdentityConfig,
    pub store: StoreConfig,
    pub registry: RegistryConfig,
    pub exchange: ExchangeConfig,
    pub tip_queue: TipQueueConfig,
    pub shutdown: ShutdownConfig,
    /// UTF-8 prefix every pub/sub topic name is built from: `<prefix>/<schema>`.
    pub topic_prefix: String,
    pub max_record_size: usize,
    #[serde(with = "humantime_serde")]
    pub plugin_call_timeout: Duration,
    pub plugin: PluginLoadConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            store: StoreConfig::default(),
            registry: RegistryConfig::default(),
            exchange: ExchangeConfig::default(),
            tip_queue: TipQueueConfig::default(),
            shutdown: ShutdownConfig::default(),
            topic_prefix: "astra".to_string(),
            max_record_size: 1024 * 1024,
            plugin_call_timeout: Duration::from_secs(5),
            plugin: PluginLoadConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn test(suffix: &str) -> Self {
        Self {
            identity: IdentityConfig::test(suffix),
            store: StoreConfig::test(suffix),
            registry: RegistryConfig::test(suffix),
            ..Self::default()
        }
    }
}
