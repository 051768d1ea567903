//! Error types for Agentcraft

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("degenerate dimension {name}: max ({max}) must exceed min ({min})")]
    DegenerateDimension { name: String, min: f64, max: f64 },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid attractor id: {0}")]
    InvalidAttractorId(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn degenerate_dimension(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self::DegenerateDimension {
            name: name.into(),
            min,
            max,
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}
