use analysis_core::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{ticker}: no {what} available")]
    MissingData { ticker: String, what: &'static str },

    #[error("{0} already has an open position")]
    PositionAlreadyOpen(String),

    #[error("collaborator failed: {0}")]
    Collaborator(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
