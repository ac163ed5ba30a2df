use thiserror::Error;

/// Tagged error kinds propagated across component boundaries. Never used for
/// ordinary control flow -- callers match on `kind()` to decide how to
/// respond, the same stable token that crosses the HTTP/peer-protocol
/// boundary.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("unknown schema: {0}")]
    InvalidSchema(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("already exists")]
    AlreadyExists,

    #[error("unauthorized")]
    Unauthorized,

    #[error("rate limited")]
    RateLimited,

    #[error("blocked")]
    Blocked,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(String),

    #[error("plugin module not loaded")]
    ModuleNotLoaded,

    #[error("plugin module trapped: {0}")]
    ModuleTrap(String),

    #[error("plugin memory access out of bounds")]
    MemoryOutOfBounds,

    #[error("plugin allocation failed")]
    AllocationFailed,

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The stable, user-visible token for this error kind. Query-path
    /// failures surface this instead of a formatted message so that callers
    /// across languages/process boundaries can match on it.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::InvalidSchema(_) => "invalid_schema",
            CoreError::Validation(_) => "validation",
            CoreError::NotFound => "not_found",
            CoreError::Conflict(_) => "conflict",
            CoreError::AlreadyExists => "already_exists",
            CoreError::Unauthorized => "unauthorized",
            CoreError::RateLimited => "rate_limited",
            CoreError::Blocked => "blocked",
            CoreError::Io(_) => "io",
            CoreError::Database(_) => "database",
            CoreError::ModuleNotLoaded => "module_not_loaded",
            CoreError::ModuleTrap(_) => "module_trap",
            CoreError::MemoryOutOfBounds => "memory_out_of_bounds",
            CoreError::AllocationFailed => "allocation_failed",
            CoreError::Timeout(_) => "timeout",
            CoreError::Cancelled => "cancelled",
            CoreError::Internal(_) => "internal",
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
