//! Reseller byte-quota accounting.
//!
//! A reseller owns a set of child accounts and may carry a byte quota. The
//! ledger recomputes the reseller's consumption from its children on every
//! decision, gates new consumption against the quota, and disables the
//! children of any reseller whose consumption has reached its quota.
//!
//! Storage is supplied by the host through the [`AccountStore`] trait;
//! [`MemoryStore`] is an in-process implementation.

pub mod config;
pub mod error;
pub mod ledger;
pub mod model;
pub mod store;

pub use config::LedgerConfig;
pub use error::LedgerError;
pub use ledger::{Admission, QuotaLedger, RejectReason, SweepReport, UsageStats};
pub use model::{format_gb, ChildAccount, Quota, Remaining, Reseller, UsageEvent, ONE_GIG};
pub use store::{AccountStore, EventQuery, MemoryStore, StoreError, DEFAULT_EVENT_LIMIT};
