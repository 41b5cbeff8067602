pub mod database;
pub mod error;
pub mod schema;

pub use database::AccountDatabase;
pub use error::StorageError;

pub const ACCOUNT_DB_FILENAME: &str = "reseller_quota.db";
pub const RESELLERS_TABLE: &str = "resellers";
pub const CHILD_ACCOUNTS_TABLE: &str = "child_accounts";
pub const USAGE_EVENTS_TABLE: &str = "usage_events";
