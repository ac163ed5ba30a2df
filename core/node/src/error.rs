use thiserror::Error;

/// Startup and lifecycle errors, tagged with the process exit code the
/// binary entry point should return for each (§6: `0` clean shutdown, `1`
/// configuration/identity error, `2` database open failure, `3` plugin
/// load failure).
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("identity error: {0}")]
    Identity(String),

    #[error("store error: {0}")]
    Store(#[source] astra_types::CoreError),

    #[error("registry error: {0}")]
    Registry(#[source] astra_types::CoreError),

    #[error("plugin engine init failed: {0}")]
    Plugin(String),

    #[error("plugin load failed: {0}")]
    PluginLoad(#[source] astra_plugin::PluginError),
}

impl NodeError {
    pub fn exit_code(&self) -> i32 {
        match self {
            NodeError::Identity(_) => 1,
            NodeError::Store(_) => 2,
            NodeError::Registry(_) => 2,
            NodeError::Plugin(_) => 3,
            NodeError::PluginLoad(_) => 3,
        }
    }
}

pub type NodeResult<T> = Result<T, NodeError>;
