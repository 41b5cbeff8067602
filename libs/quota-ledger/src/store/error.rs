use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("record {0} not found")]
    NotFound(String),
    #[error("reseller {reseller_id} has invalid stored quota {value}")]
    InvalidQuota { reseller_id: String, value: i64 },
}
