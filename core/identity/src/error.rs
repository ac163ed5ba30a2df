use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("invalid node key file: {0}")]
    InvalidNodeKey(String),

    #[error("failed to (de)serialize profile: {0}")]
    Profile(#[from] serde_json::Error),
}

pub type IdentityResult<T> = Result<T, IdentityError>;
