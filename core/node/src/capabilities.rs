use astra_types::{CoreResult, PeerId, SchemaName, TrustLevel};
use async_trait::async_trait;

/// Capability interface for emitting a tip announcement on a schema's
/// topic. Exists so that external callers (e.g. the HTTP facade's ingest
/// handler) can publish without holding a [`crate::Node`] reference --
/// they only ever see this trait object.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish_tip(&self, cid: String, schema: SchemaName, signature: Option<Vec<u8>>) -> CoreResult<()>;
}

/// Capability interface for looking up a peer's current trust level,
/// without exposing the rest of the peer registry.
pub trait TrustQuery: Send + Sync {
    fn trust_level(&self, peer: &PeerId) -> TrustLevel;
}
