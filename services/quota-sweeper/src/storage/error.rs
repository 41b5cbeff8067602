use std::io;

use reseller_quota_ledger::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("record {0} not found")]
    NotFound(String),
    #[error("invalid stored value: {0}")]
    InvalidValue(String),
    #[error("connection poisoned")]
    Poisoned,
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
}

impl From<StorageError> for StoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => StoreError::NotFound(id),
            other => StoreError::Backend(other.to_string()),
        }
    }
}
