pub mod config;
pub mod events;
pub mod gate;
mod persist;
pub mod rate_limiter;
mod registry;

pub use config::RegistryConfig;
pub use events::RegistryEvent;
pub use gate::{ConnectionGate, GateDecision};
pub use rate_limiter::TrustScaledRateLimiter;
pub use registry::{PeerRegistry, AUTO_CREATED_TRUST_LEVEL};
