use rimco_types::RimcoError;
use thiserror::Error;

/// Errors that can arise from the durable stores.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid name: {0}")]
    InvalidName(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for RimcoError {
    fn from(e: StoreError) -> Self {
        RimcoError::Persistence(e.to_string())
    }
}
