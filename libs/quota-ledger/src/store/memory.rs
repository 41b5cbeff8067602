use std::sync::Mutex;

use dashmap::{DashMap, DashSet};

use crate::model::{ChildAccount, Quota, Reseller, UsageEvent};

use super::{AccountStore, EventQuery, StoreError};

/// In-process store keyed by identifier.
#[derive(Default)]
pub struct MemoryStore {
    resellers: DashMap<String, Reseller>,
    children: DashMap<String, ChildAccount>,
    events: Mutex<Vec<UsageEvent>>,
    failing_disables: DashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_reseller(&self, reseller: Reseller) {
        self.resellers.insert(reseller.id.clone(), reseller);
    }

    pub fn insert_child(&self, child: ChildAccount) {
        self.children.insert(child.id.clone(), child);
    }

    pub fn remove_child(&self, child_id: &str) -> Option<ChildAccount> {
        self.children.remove(child_id).map(|(_, child)| child)
    }

    /// Metering entry point: overwrites a child's consumed-bytes counter.
    pub fn set_consumed_bytes(&self, child_id: &str, bytes: u64) -> Result<(), StoreError> {
        let mut child = self
            .children
            .get_mut(child_id)
            .ok_or_else(|| StoreError::NotFound(child_id.to_string()))?;
        child.consumed_bytes = bytes;
        Ok(())
    }

    /// Administrative re-enable; the ledger never calls this.
    pub fn enable_child(&self, child_id: &str) -> Result<(), StoreError> {
        let mut child = self
            .children
            .get_mut(child_id)
            .ok_or_else(|| StoreError::NotFound(child_id.to_string()))?;
        child.enabled = true;
        Ok(())
    }

    /// Makes every subsequent `disable_child` for `child_id` fail.
    pub fn fail_disable_for(&self, child_id: &str) {
        self.failing_disables.insert(child_id.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_disables.clear();
    }

    fn select_events(
        &self,
        query: &EventQuery,
        owned: impl Fn(&UsageEvent) -> bool,
    ) -> Result<Vec<UsageEvent>, StoreError> {
        let events = self
            .events
            .lock()
            .map_err(|_| StoreError::Backend("event log poisoned".into()))?;

        // Newest insert first so equal timestamps keep insertion recency.
        let mut matching: Vec<UsageEvent> = events
            .iter()
            .rev()
            .filter(|event| owned(*event) && query.matches(event.recorded_at))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        matching.truncate(query.limit);
        Ok(matching)
    }
}

impl AccountStore for MemoryStore {
    fn reseller(&self, reseller_id: &str) -> Result<Option<Reseller>, StoreError> {
        Ok(self.resellers.get(reseller_id).map(|entry| entry.clone()))
    }

    fn reseller_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self
            .resellers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn sub_resellers(&self, reseller_id: &str) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self
            .resellers
            .iter()
            .filter(|entry| entry.parent_id.as_deref() == Some(reseller_id))
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn children_of(&self, reseller_id: &str) -> Result<Vec<ChildAccount>, StoreError> {
        let mut children: Vec<ChildAccount> = self
            .children
            .iter()
            .filter(|entry| entry.reseller_id.as_deref() == Some(reseller_id))
            .map(|entry| entry.value().clone())
            .collect();
        children.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(children)
    }

    fn child(&self, child_id: &str) -> Result<Option<ChildAccount>, StoreError> {
        Ok(self.children.get(child_id).map(|entry| entry.clone()))
    }

    fn disable_child(&self, child_id: &str) -> Result<bool, StoreError> {
        if self.failing_disables.contains(child_id) {
            return Err(StoreError::Backend(format!(
                "write rejected for child {child_id}"
            )));
        }

        let mut child = self
            .children
            .get_mut(child_id)
            .ok_or_else(|| StoreError::NotFound(child_id.to_string()))?;
        let changed = child.enabled;
        child.enabled = false;
        Ok(changed)
    }

    fn set_quota(&self, reseller_id: &str, quota: Option<Quota>) -> Result<(), StoreError> {
        let mut reseller = self
            .resellers
            .get_mut(reseller_id)
            .ok_or_else(|| StoreError::NotFound(reseller_id.to_string()))?;
        reseller.quota = quota;
        Ok(())
    }

    fn append_usage_event(&self, event: &UsageEvent) -> Result<(), StoreError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| StoreError::Backend("event log poisoned".into()))?;
        events.push(event.clone());
        Ok(())
    }

    fn usage_events(
        &self,
        reseller_id: &str,
        query: &EventQuery,
    ) -> Result<Vec<UsageEvent>, StoreError> {
        self.select_events(query, |event| {
            event.reseller_id.as_deref() == Some(reseller_id)
        })
    }

    fn child_usage_events(
        &self,
        child_id: &str,
        query: &EventQuery,
    ) -> Result<Vec<UsageEvent>, StoreError> {
        self.select_events(query, |event| event.child_id == child_id)
    }
}
