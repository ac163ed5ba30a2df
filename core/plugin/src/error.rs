use thiserror::Error;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("no module is loaded")]
    NotLoaded,
    #[error("module allocation failed")]
    AllocationFailed,
    #[error("module memory access out of bounds")]
    MemoryAccessOutOfBounds,
    #[error("module is missing expected export: {0}")]
    MissingExport(String),
    #[error("module trapped: {0}")]
    ModuleTrap(String),
    #[error("call timed out after {0}ms")]
    Timeout(u64),
    #[error("failed to compile or instantiate module: {0}")]
    Load(String),
    #[error("plugin_init returned non-zero status {0}")]
    InitFailed(i32),
}

impl From<PluginError> for astra_types::CoreError {
    fn from(err: PluginError) -> Self {
        match err {
            PluginError::NotLoaded => astra_types::CoreError::ModuleNotLoaded,
            PluginError::AllocationFailed => astra_types::CoreError::AllocationFailed,
            PluginError::MemoryAccessOutOfBounds => astra_types::CoreError::MemoryOutOfBounds,
            PluginError::ModuleTrap(msg) => astra_types::CoreError::ModuleTrap(msg),
            PluginError::Timeout(ms) => {
                astra_types::CoreError::Timeout(std::time::Duration::from_millis(ms))
            }
            other => astra_types::CoreError::Internal(other.to_string()),
        }
    }
}
