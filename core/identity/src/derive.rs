use bip39::Mnemonic;
use ed25519_dalek::SigningKey;
use hkdf::Hkdf;
use sha2::Sha512;
use x25519_dalek::{PublicKey as XPublicKey, StaticSecret};

/// Fixed derivation path for the Ed25519-class signing key.
pub const SIGNING_PATH: &str = "m/astra/signing/0";
/// Fixed derivation path for the X25519-class encryption key.
pub const ENCRYPTION_PATH: &str = "m/astra/encryption/0";

/// Keys derived from a mnemonic + passphrase along fixed paths. Derivation
/// is deterministic: the same mnemonic and passphrase always yield the same
/// keys, which is the whole point of persisting the mnemonic instead of raw
/// key bytes.
pub struct DerivedKeys {
    pub signing: SigningKey,
    pub encryption_secret: StaticSecret,
    pub encryption_pub: XPublicKey,
}

/// Derive signing and encryption keys from a mnemonic seed. Logs only the
/// derivation path taken, never the seed or the derived secrets.
pub fn derive_keys(mnemonic: &Mnemonic, passphrase: &str) -> DerivedKeys {
    let seed = mnemonic.to_seed(passphrase);
    let hk = Hkdf::<Sha512>::new(None, &seed);

    let mut signing_seed = [0u8; 32];
    hk.expand(SIGNING_PATH.as_bytes(), &mut signing_seed)
        .expect("32 bytes is a valid HKDF-SHA512 output length");
    tracing::info!(path = SIGNING_PATH, "derived signing key");
    let signing = SigningKey::from_bytes(&signing_seed);

    let mut encryption_seed = [0u8; 32];
    hk.expand(ENCRYPTION_PATH.as_bytes(), &mut encryption_seed)
        .expect("32 bytes is a valid HKDF-SHA512 output length");
    tracing::info!(path = ENCRYPTION_PATH, "derived encryption key");
    let encryption_secret = StaticSecret::from(encryption_seed);
    let encryption_pub = XPublicKey::from(&encryption_secret);

    DerivedKeys {
        signing,
        encryption_secret,
        encryption_pub,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let mnemonic = Mnemonic::generate(12).unwrap();
        let a = derive_keys(&mnemonic, "");
        let b = derive_keys(&mnemonic, "");
        assert_eq!(a.signing.to_bytes(), b.signing.to_bytes());
        assert_eq!(
            a.encryption_pub.to_bytes(),
            b.encryption_pub.to_bytes()
        );
    }

    #[test]
    fn different_passphrase_changes_keys() {
        let mnemonic = Mnemonic::generate(12).unwrap();
        let a = derive_keys(&mnemonic, "alpha");
        let b = derive_keys(&mnemonic, "beta");
        assert_ne!(a.signing.to_bytes(), b.signing.to_bytes());
    }
}
