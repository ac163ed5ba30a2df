use astra_types::{PeerId, TrustLevel};

use crate::registry::PeerRegistry;

/// Outcome of a connection-gate intercept. `Reject` carries a short reason
/// for logging; it is never shown to the remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Reject(&'static str),
}

impl GateDecision {
    pub fn is_allow(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }
}

/// Applies blocklist, strict-mode and trust-level policy at each phase of a
/// connection's lifecycle. The gate never mutates trust state itself; it
/// only reads the registry and, on `InterceptUpgraded`, records the
/// connection.
pub struct ConnectionGate<'a> {
    registry: &'a PeerRegistry,
}

impl<'a> ConnectionGate<'a> {
    pub fn new(registry: &'a PeerRegistry) -> Self {
        Self { registry }
    }

    fn blocklist_or<F>(&self, id: &PeerId, otherwise: F) -> GateDecision
    where
        F: FnOnce() -> GateDecision,
    {
        if self.registry.is_blocked(id) {
            GateDecision::Reject("blocked")
        } else {
            otherwise()
        }
    }

    /// Called before dialing a known peer identity. Blocklist check
    /// precedes everything else. In strict mode, a peer absent from the
    /// registry is rejected outright. A peer present but untrusted is also
    /// rejected.
    pub fn intercept_peer_dial(&self, id: &PeerId) -> GateDecision {
        self.blocklist_or(id, || match self.registry.get(id) {
            Some(peer) if peer.trust_level == TrustLevel::Untrusted => {
                GateDecision::Reject("untrusted")
            }
            Some(_) => GateDecision::Allow,
            None if self.registry.is_strict_mode() => GateDecision::Reject("unknown peer in strict mode"),
            None => GateDecision::Allow,
        })
    }

    /// Called before dialing a bare address with no peer identity attached
    /// yet. There is nothing to check against the registry besides the
    /// blocklist, which is keyed by peer id and therefore never matches
    /// here; this phase always allows unless a future revision attaches
    /// address-level blocking.
    pub fn intercept_addr_dial(&self) -> GateDecision {
        GateDecision::Allow
    }

    /// Called when accepting an inbound connection before the remote
    /// identity is known. Always allows; rejection based on identity
    /// happens later, at `InterceptSecured`.
    pub fn intercept_accept(&self) -> GateDecision {
        GateDecision::Allow
    }

    /// Called once the transport is secured and the remote identity is
    /// known, for both inbound and outbound connections. Same policy as
    /// `InterceptPeerDial`: blocklist first, then strict-mode absence,
    /// then trust level.
    pub fn intercept_secured(&self, _local: &PeerId, remote: &PeerId) -> GateDecision {
        self.intercept_peer_dial(remote)
    }

    /// Called once the connection is fully upgraded and ready for use.
    /// Always allows and records the connection in the registry, creating
    /// the peer entry if the registry isn't in strict mode.
    pub fn intercept_upgraded(&self, remote: &PeerId, now: i64) -> GateDecision {
        self.registry.record_connection(remote, now);
        GateDecision::Allow
    }
}
