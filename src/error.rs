use thiserror::Error;

use crate::config::ConfigError;
use crate::generator::GeneratorError;
use crate::platform::PlatformError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("catalog store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// The catalog cannot be reached at all; fatal for catalog-backed operations.
    #[error("catalog store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
