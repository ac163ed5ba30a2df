//! Node identity: derives or generates the long-lived signing and
//! key-exchange key pairs and the stable peer identifier computed from them.

pub mod config;
pub mod derive;
pub mod error;
pub mod profile;

use std::fs;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use astra_types::PeerId;
use bip39::Mnemonic;
use ed25519_dalek::{SigningKey, VerifyingKey};
use multihash::Multihash;
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret};

pub use config::IdentityConfig;
pub use error::{IdentityError, IdentityResult};
pub use profile::IdentityProfile;

/// Multicodec code for SHA2-256, per the multihash table.
const SHA2_256_CODE: u64 = 0x12;

/// Which path was taken to obtain the current keys. Recorded in a single
/// explicit log line at startup, never inferred silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivationMode {
    /// Keys derived from a mnemonic along fixed paths.
    Derived,
    /// A fresh, non-recoverable signing key pair.
    Random,
}

/// A source of mnemonics for nodes that don't have one yet but can obtain
/// one from elsewhere (e.g. the plugin runtime). Kept as a capability
/// interface so this crate never depends on the plugin runtime directly.
pub trait MnemonicSource {
    fn generate_mnemonic(&self) -> IdentityResult<Mnemonic>;
}

/// Signing and encryption key pairs plus the peer identifier derived from
/// them. Loaded or generated once at startup; lives for the process
/// lifetime, destroyed only at shutdown.
pub struct DerivedIdentity {
    pub signing: SigningKey,
    pub encryption_secret: StaticSecret,
    pub encryption_pub: XPublicKey,
    pub peer_id: PeerId,
    pub derivation_paths: Vec<String>,
    pub mode: DerivationMode,
}

impl DerivedIdentity {
    pub fn signing_public(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    pub fn sign(&self, message: &[u8]) -> ed25519_dalek::Signature {
        use ed25519_dalek::Signer;
        self.signing.sign(message)
    }
}

/// Compute the deterministic peer identifier for a signing public key: the
/// multihash of its raw bytes, hex-encoded.
pub fn peer_id_from_signing_key(pubkey: &VerifyingKey) -> PeerId {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(pubkey.as_bytes());
    let mh = Multihash::<64>::wrap(SHA2_256_CODE, &digest)
        .expect("sha2-256 digest always fits the multihash buffer");
    PeerId(hex::encode(mh.to_bytes()))
}

/// Load or generate the node's identity, per the startup order in the
/// design: use an existing mnemonic if present, else generate one via the
/// provided [`MnemonicSource`] if available, else fall back to a fresh
/// random signing key pair.
pub fn load_or_generate(
    config: &IdentityConfig,
    mnemonic_source: Option<&dyn MnemonicSource>,
) -> IdentityResult<DerivedIdentity> {
    if config.mnemonic_path.exists() {
        let phrase = fs::read_to_string(&config.mnemonic_path)?;
        let mnemonic = Mnemonic::parse(phrase.trim())
            .map_err(|e| IdentityError::InvalidMnemonic(e.to_string()))?;
        tracing::info!(path = %config.mnemonic_path.display(), "loaded existing mnemonic");
        return Ok(from_mnemonic(&mnemonic, config));
    }

    if let Some(source) = mnemonic_source {
        let mnemonic = source.generate_mnemonic()?;
        persist_mnemonic(&config.mnemonic_path, &mnemonic)?;
        tracing::info!("generated new mnemonic via plugin-backed source");
        return Ok(from_mnemonic(&mnemonic, config));
    }

    tracing::info!("no mnemonic present and no mnemonic source configured, generating random identity");
    generate_random(config)
}

fn from_mnemonic(mnemonic: &Mnemonic, config: &IdentityConfig) -> DerivedIdentity {
    let keys = derive::derive_keys(mnemonic, &config.passphrase);
    let peer_id = peer_id_from_signing_key(&keys.signing.verifying_key());
    DerivedIdentity {
        signing: keys.signing,
        encryption_secret: keys.encryption_secret,
        encryption_pub: keys.encryption_pub,
        peer_id,
        derivation_paths: vec![
            derive::SIGNING_PATH.to_string(),
            derive::ENCRYPTION_PATH.to_string(),
        ],
        mode: DerivationMode::Derived,
    }
}

fn generate_random(config: &IdentityConfig) -> IdentityResult<DerivedIdentity> {
    use rand::rngs::OsRng;

    if config.node_key_path.exists() {
        let bytes = fs::read(&config.node_key_path)?;
        let array: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| IdentityError::InvalidNodeKey("expected 32 raw key bytes".into()))?;
        let signing = SigningKey::from_bytes(&array);
        return Ok(finish_random(signing));
    }

    let signing = SigningKey::generate(&mut OsRng);
    write_private(&config.node_key_path, signing.to_bytes().as_slice())?;
    Ok(finish_random(signing))
}

fn finish_random(signing: SigningKey) -> DerivedIdentity {
    let encryption_secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let encryption_pub = XPublicKey::from(&encryption_secret);
    let peer_id = peer_id_from_signing_key(&signing.verifying_key());
    DerivedIdentity {
        signing,
        encryption_secret,
        encryption_pub,
        peer_id,
        derivation_paths: Vec::new(),
        mode: DerivationMode::Random,
    }
}

fn persist_mnemonic(path: &Path, mnemonic: &Mnemonic) -> IdentityResult<()> {
    write_private(path, mnemonic.to_string().as_bytes())
}

fn write_private(path: &Path, bytes: &[u8]) -> IdentityResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)?;
    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_persists_random_identity() {
        let config = IdentityConfig::test("random");
        let identity = load_or_generate(&config, None).unwrap();
        assert_eq!(identity.mode, DerivationMode::Random);
        assert!(config.node_key_path.exists());

        let again = load_or_generate(&config, None).unwrap();
        assert_eq!(identity.peer_id, again.peer_id);
        let _ = std::fs::remove_dir_all(config.node_key_path.parent().unwrap());
    }

    struct FixedSource(String);
    impl MnemonicSource for FixedSource {
        fn generate_mnemonic(&self) -> IdentityResult<Mnemonic> {
            Mnemonic::parse(&self.0).map_err(|e| IdentityError::InvalidMnemonic(e.to_string()))
        }
    }

    #[test]
    fn uses_mnemonic_source_and_then_reloads_file() {
        let config = IdentityConfig::test("mnemonic-source");
        let phrase = Mnemonic::generate(12).unwrap().to_string();
        let source = FixedSource(phrase);

        let first = load_or_generate(&config, Some(&source)).unwrap();
        assert_eq!(first.mode, DerivationMode::Derived);
        assert!(config.mnemonic_path.exists());

        // Second call finds the persisted file and doesn't need the source.
        let second = load_or_generate(&config, None).unwrap();
        assert_eq!(first.peer_id, second.peer_id);
        let _ = std::fs::remove_dir_all(config.mnemonic_path.parent().unwrap());
    }

    #[test]
    fn peer_id_is_stable_for_same_key() {
        let signing = SigningKey::from_bytes(&[7u8; 32]);
        let a = peer_id_from_signing_key(&signing.verifying_key());
        let b = peer_id_from_signing_key(&signing.verifying_key());
        assert_eq!(a, b);
    }
}
