//! Shared data model for the exchange node: schema identifiers, records, the
//! secondary index, peer/trust records, tips, and the tagged error taxonomy.
//!
//! This crate has no I/O of its own; it only defines the shapes that the
//! store, registry, validator, topic manager and tip queue pass between
//! each other.

pub mod error;
pub mod health;
pub mod peer;
pub mod record;
pub mod schema;
pub mod tip;

pub use error::{CoreError, CoreResult};
pub use health::{HealthStatus, HEARTBEAT_INTERVAL_SECS, LIVE_WINDOW_SECS, MISSED_BEATS_THRESHOLD};
pub use peer::{Blocklist, ContactCard, PeerCounters, PeerId, PeerMetadata, TrustLevel, TrustedPeer};
pub use record::{IndexEntry, Record};
pub use schema::SchemaName;
pub use tip::{PartialTipPolicy, ResolvedConfig, Tip, TipQueueConfig};
