pub mod config;
pub mod storage;
pub mod sweeper;

pub use config::SweeperConfig;
pub use storage::{AccountDatabase, StorageError};
pub use sweeper::{SweepError, SweepScheduler};
