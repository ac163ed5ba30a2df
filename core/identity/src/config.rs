use std::path::PathBuf;

use astra_utils::config::home_path;
use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// BIP-39 mnemonic, plaintext, file mode 0600. Never logged.
    pub mnemonic_path: PathBuf,
    /// Raw private key bytes for the random-identity fallback, mode 0600.
    pub node_key_path: PathBuf,
    /// User-editable display profile. Never holds key material.
    pub profile_path: PathBuf,
    /// Passphrase applied on top of the mnemonic during derivation.
    pub passphrase: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            mnemonic_path: home_path("keys/mnemonic"),
            node_key_path: home_path("keys/node.key"),
            profile_path: home_path("keys/epm-profile.json"),
            passphrase: String::new(),
        }
    }
}

impl IdentityConfig {
    pub fn test(suffix: &str) -> Self {
        let dir = std::env::temp_dir().join(format!("astra-identity-test-{suffix}"));
        Self {
            mnemonic_path: dir.join("mnemonic"),
            node_key_path: dir.join("node.key"),
            profile_path: dir.join("epm-profile.json"),
            passphrase: String::new(),
        }
    }
}
