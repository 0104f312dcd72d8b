//! Error types for StructureDefinition loading

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("StructureDefinition not found: {0}")]
    StructureDefinitionNotFound(String),

    #[error("Invalid StructureDefinition: {0}")]
    InvalidStructureDefinition(String),

    #[error("Loader error: {0}")]
    Loader(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<strata_models::Error> for Error {
    fn from(err: strata_models::Error) -> Self {
        Error::InvalidStructureDefinition(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
