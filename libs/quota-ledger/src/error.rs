use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("reseller {0} not found")]
    ResellerNotFound(String),
    #[error("child account {0} not found")]
    ChildNotFound(String),
    #[error("invalid quota: {0}")]
    InvalidQuota(String),
    #[error("storage error: {0}")]
    Storage(#[source] StoreError),
    #[error(
        "enforcement for reseller {reseller_id} stopped after disabling {disabled} children: {source}"
    )]
    PartialEnforcement {
        reseller_id: String,
        disabled: usize,
        #[source]
        source: StoreError,
    },
}

impl LedgerError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            LedgerError::ResellerNotFound(_) | LedgerError::ChildNotFound(_)
        )
    }

    /// Children disabled before the failure, for errors raised mid-enforcement.
    pub fn disabled_before_failure(&self) -> Option<usize> {
        match self {
            LedgerError::PartialEnforcement { disabled, .. } => Some(*disabled),
            _ => None,
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidQuota { reseller_id, value } => LedgerError::InvalidQuota(format!(
                "reseller {reseller_id} has negative quota {value}"
            )),
            other => LedgerError::Storage(other),
        }
    }
}
