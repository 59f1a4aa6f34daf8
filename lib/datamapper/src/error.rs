use thiserror::Error;

use crate::changeset::InvalidChangeset;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Validation failed for {}: {}", .0.collection, .0.summary())]
    Validation(Box<InvalidChangeset>),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("A transaction is already in progress")]
    TransactionInProgress,
}

impl StorageError {
    /// The rejected changeset, when this is a validation failure.
    pub fn invalid_changeset(&self) -> Option<&InvalidChangeset> {
        match self {
            StorageError::Validation(invalid) => Some(invalid),
            _ => None,
        }
    }
}

impl From<InvalidChangeset> for StorageError {
    fn from(invalid: InvalidChangeset) -> Self {
        StorageError::Validation(Box::new(invalid))
    }
}
