use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A peer identifier: the multihash of a node's signing public key,
/// hex-encoded. Deterministic for as long as the signing key doesn't change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        PeerId(s)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        PeerId(s.to_string())
    }
}

/// Total-ordered trust tier controlling both the connection gate and the
/// rate limiter. `Untrusted` is the bottom, `Admin` the top.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[repr(u8)]
pub enum TrustLevel {
    #[default]
    Untrusted = 0,
    Limited = 1,
    Standard = 2,
    Trusted = 3,
    Admin = 4,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerMetadata {
    pub name: Option<String>,
    pub organization: Option<String>,
    pub groups: Vec<String>,
    pub notes: Option<String>,
}

/// Persisted counters maintained by the registry as a peer connects and
/// exchanges records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerCounters {
    pub connection_count: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// A contact card persisted alongside a peer's registry entry, e.g. an
/// X25519 public key used for key exchange. Opaque to the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactCard {
    pub encryption_pub: Vec<u8>,
    pub signing_pub: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustedPeer {
    pub id: PeerId,
    pub addrs: Vec<String>,
    pub trust_level: TrustLevel,
    pub metadata: Option<PeerMetadata>,
    pub counters: PeerCounters,
    pub added_at: i64,
    pub last_connected: Option<i64>,
    pub contact_card: Option<ContactCard>,
}

impl TrustedPeer {
    pub fn new(id: PeerId, trust_level: TrustLevel, added_at: i64) -> Self {
        Self {
            id,
            addrs: Vec::new(),
            trust_level,
            metadata: None,
            counters: PeerCounters::default(),
            added_at,
            last_connected: None,
            contact_card: None,
        }
    }
}

/// Set of peer identifiers that are rejected at every connection phase,
/// regardless of trust level.
pub type Blocklist = HashSet<PeerId>;
