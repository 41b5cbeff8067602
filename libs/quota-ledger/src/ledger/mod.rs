pub mod admission;
pub mod manager;
pub mod policy;
pub mod stats;
pub mod sweep;

pub use admission::{Admission, RejectReason};
pub use manager::QuotaLedger;
pub use stats::UsageStats;
pub use sweep::SweepReport;
