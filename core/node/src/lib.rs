//! The node: wires every subsystem together behind a one-way ownership
//! tree and runs the bounded shutdown sequence across all of them.

pub mod capabilities;
pub mod config;
pub mod error;
mod node;

pub use capabilities::{Publisher, TrustQuery};
pub use config::{NodeConfig, PluginLoadConfig, ShutdownConfig};
pub use error::{NodeError, NodeResult};
pub use node::Node;
