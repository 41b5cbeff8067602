use chrono::{DateTime, Utc};

use crate::model::{ChildAccount, Quota, Reseller, UsageEvent};

pub mod error;
pub mod memory;

pub use error::StoreError;
pub use memory::MemoryStore;

/// Default cap on the number of audit events returned by one query.
pub const DEFAULT_EVENT_LIMIT: usize = 100;

/// Time window and size cap for audit-event queries. Both bounds are
/// inclusive; results are newest first and truncated to `limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventQuery {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            since: None,
            until: None,
            limit: DEFAULT_EVENT_LIMIT,
        }
    }
}

impl EventQuery {
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, recorded_at: DateTime<Utc>) -> bool {
        self.since.map_or(true, |since| recorded_at >= since)
            && self.until.map_or(true, |until| recorded_at <= until)
    }
}

/// Host storage seam.
///
/// Counters are always read fresh; implementations must not hand back cached
/// aggregates. Listing methods return records ordered by identifier.
pub trait AccountStore: Send + Sync {
    fn reseller(&self, reseller_id: &str) -> Result<Option<Reseller>, StoreError>;

    /// Identifiers of every reseller. Records are decoded one at a time via
    /// [`AccountStore::reseller`], so a single bad row stays isolated.
    fn reseller_ids(&self) -> Result<Vec<String>, StoreError>;

    /// Direct sub-resellers, for hosts that nest resellers.
    fn sub_resellers(&self, reseller_id: &str) -> Result<Vec<String>, StoreError>;

    /// Children directly owned by `reseller_id`.
    fn children_of(&self, reseller_id: &str) -> Result<Vec<ChildAccount>, StoreError>;

    fn child(&self, child_id: &str) -> Result<Option<ChildAccount>, StoreError>;

    /// Clears the enabled flag. Returns `true` when the flag actually changed.
    fn disable_child(&self, child_id: &str) -> Result<bool, StoreError>;

    fn set_quota(&self, reseller_id: &str, quota: Option<Quota>) -> Result<(), StoreError>;

    fn append_usage_event(&self, event: &UsageEvent) -> Result<(), StoreError>;

    /// Events attributed to `reseller_id`, newest first.
    fn usage_events(
        &self,
        reseller_id: &str,
        query: &EventQuery,
    ) -> Result<Vec<UsageEvent>, StoreError>;

    /// Events recorded against `child_id`, newest first.
    fn child_usage_events(
        &self,
        child_id: &str,
        query: &EventQuery,
    ) -> Result<Vec<UsageEvent>, StoreError>;
}
