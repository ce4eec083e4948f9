//! Errors.

use crate::engine::EngineError;
use crate::pool::{DrainError, PoolError};

/// Top-level gateway error. Every HTTP handler converts into this type and
/// calls [`Error::status_code`] to pick the response line.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Drain(#[from] DrainError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("HTTP arguments missing")]
    MissingArguments,
    #[error("Uploaded file is empty")]
    EmptyUpload,
    #[error("static path referencing password file")]
    ForbiddenPath,
    #[error("bad configuration: {0}")]
    BadConfig(String),
}

impl Error {
    /// Maps an error to the HTTP status code table in spec.md §6.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::MissingArguments | Error::EmptyUpload => 400,
            Error::ForbiddenPath => 403,
            Error::Pool(e) => e.status_code(),
            Error::Engine(e) => e.status_code(),
            Error::Drain(e) => e.status_code(),
            Error::Io(_) | Error::BadConfig(_) => 500,
        }
    }
}
