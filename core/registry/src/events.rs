use astra_types::{PeerId, TrustLevel};

#[derive(Debug, Clone)]
pub enum RegistryEvent {
    PeerAdded(PeerId),
    PeerRemoved(PeerId),
    PeerUpdated(PeerId),
    TrustLevelChanged {
        peer_id: PeerId,
        old: TrustLevel,
        new: TrustLevel,
    },
}
