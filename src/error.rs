use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SagaError {
    #[error("Malformed event payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Failed to encode event: {0}")]
    Encode(serde_json::Error),
    #[error("No transaction found for the given id: {0}")]
    Conflict(String),
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Bus transport error: {0}")]
    Transport(String),
    #[error("Record processing timed out after {0:?}")]
    Timeout(Duration),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Coarse classification of a [`SagaError`], attached to record failure logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Decode,
    Conflict,
    Storage,
    Transport,
    Timeout,
    Validation,
    Internal,
}

impl SagaError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SagaError::Decode(_) => ErrorKind::Decode,
            SagaError::Conflict(_) => ErrorKind::Conflict,
            SagaError::Storage(_) => ErrorKind::Storage,
            SagaError::Transport(_) => ErrorKind::Transport,
            SagaError::Timeout(_) => ErrorKind::Timeout,
            SagaError::Validation(_) => ErrorKind::Validation,
            SagaError::Encode(_) | SagaError::Config(_) | SagaError::Io(_) | SagaError::Csv(_) => {
                ErrorKind::Internal
            }
        }
    }
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for SagaError {
    fn from(err: rocksdb::Error) -> Self {
        SagaError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SagaError>;
