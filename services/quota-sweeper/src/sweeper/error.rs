use reseller_quota_ledger::LedgerError;
use thiserror::Error;
use tokio::task::JoinError;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("sweep task failed: {0}")]
    Join(#[from] JoinError),
}
