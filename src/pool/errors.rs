//! Errors surfaced by the session pool and the result drain, mapped to the
//! HTTP status table in spec.md §6.

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Out of resources")]
    OutOfResources,
    #[error("session not found")]
    NotFound,
    #[error("engine authentication failed: {0}")]
    AuthFailed(String),
    #[error("engine connect failed: {0}")]
    ConnectFailed(String),
    #[error("Cancel requested but no query in flight")]
    CancelNoQuery,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PoolError {
    pub fn status_code(&self) -> u16 {
        match self {
            PoolError::OutOfResources => 503,
            PoolError::NotFound => 404,
            PoolError::AuthFailed(_) => 401,
            PoolError::ConnectFailed(_) => 502,
            PoolError::CancelNoQuery => 409,
            PoolError::Io(_) => 500,
        }
    }
}

/// Errors from [`crate::drain`]'s read-bytes/read-lines operations.
#[derive(Debug, thiserror::Error)]
pub enum DrainError {
    #[error("output not saved")]
    NotSaved,
    #[error("output not saved in binary format")]
    NotBinary,
    #[error("output not saved in text format")]
    NotText,
    #[error("EOF - range out of bounds")]
    EofBytes,
    #[error("EOF")]
    EofLines,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DrainError {
    pub fn status_code(&self) -> u16 {
        match self {
            DrainError::NotSaved => 410,
            DrainError::NotBinary | DrainError::NotText | DrainError::EofBytes | DrainError::EofLines => 416,
            DrainError::Io(_) => 500,
        }
    }
}
