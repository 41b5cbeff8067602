use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::model::{format_gb, ChildAccount, Quota, Remaining, Reseller, UsageEvent};
use crate::store::{AccountStore, EventQuery};

use super::admission::Admission;
use super::policy;
use super::stats::UsageStats;
use super::sweep::SweepReport;

/// Live view of one reseller: its record and the children counted against it.
struct Snapshot {
    reseller: Reseller,
    children: Vec<ChildAccount>,
    aggregate: u64,
}

impl Snapshot {
    fn is_exceeded(&self) -> bool {
        policy::is_exceeded(self.reseller.quota, self.aggregate)
    }
}

struct Enforcement {
    /// False when the reseller has no quota and was skipped.
    limited: bool,
    exceeded: bool,
    disabled: usize,
}

#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn AccountStore>,
    config: LedgerConfig,
    enforce_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self::with_config(store, LedgerConfig::default())
    }

    pub fn with_config(store: Arc<dyn AccountStore>, config: LedgerConfig) -> Self {
        Self {
            store,
            config,
            enforce_locks: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn AccountStore> {
        &self.store
    }

    pub fn aggregate_usage(&self, reseller_id: &str) -> Result<u64, LedgerError> {
        Ok(self.snapshot(reseller_id)?.aggregate)
    }

    pub fn remaining(&self, reseller_id: &str) -> Result<Remaining, LedgerError> {
        let reseller = self.resolve(reseller_id)?;
        if reseller.quota.is_none() {
            return Ok(Remaining::Unlimited);
        }
        let snapshot = self.snapshot_of(reseller)?;
        Ok(policy::remaining(snapshot.reseller.quota, snapshot.aggregate))
    }

    pub fn is_exceeded(&self, reseller_id: &str) -> Result<bool, LedgerError> {
        let reseller = self.resolve(reseller_id)?;
        if reseller.quota.is_none() {
            return Ok(false);
        }
        Ok(self.snapshot_of(reseller)?.is_exceeded())
    }

    /// Gate run before creating a child account for `reseller_id`.
    pub fn can_admit(
        &self,
        reseller_id: &str,
        additional_bytes: Option<u64>,
    ) -> Result<Admission, LedgerError> {
        let reseller = self.resolve(reseller_id)?;
        if reseller.quota.is_none() {
            return Ok(Admission::Admitted);
        }

        let snapshot = self.snapshot_of(reseller)?;
        let admission = policy::admit(
            snapshot.reseller.quota,
            snapshot.aggregate,
            additional_bytes,
        );

        if let Some(reason) = admission.reason() {
            info!(
                reseller_id,
                aggregate_bytes = snapshot.aggregate,
                additional_bytes = additional_bytes.unwrap_or(0),
                reason = %reason,
                "admission rejected"
            );
        }
        Ok(admission)
    }

    /// Gate run before raising a child's own usage limit to `new_limit_bytes`.
    pub fn can_raise_child_limit(
        &self,
        reseller_id: &str,
        child_id: &str,
        new_limit_bytes: u64,
    ) -> Result<Admission, LedgerError> {
        let reseller = self.resolve(reseller_id)?;
        if self.store.child(child_id)?.is_none() {
            return Err(LedgerError::ChildNotFound(child_id.to_string()));
        }
        if reseller.quota.is_none() {
            return Ok(Admission::Admitted);
        }

        let snapshot = self.snapshot_of(reseller)?;
        let own_usage = snapshot
            .children
            .iter()
            .find(|child| child.id == child_id)
            .map(|child| child.consumed_bytes)
            .ok_or_else(|| LedgerError::ChildNotFound(child_id.to_string()))?;
        let siblings_usage = snapshot.aggregate.saturating_sub(own_usage);

        let admission = policy::admit_child_limit(
            snapshot.reseller.quota,
            snapshot.aggregate,
            siblings_usage,
            new_limit_bytes,
        );

        if let Some(reason) = admission.reason() {
            info!(
                reseller_id,
                child_id,
                new_limit_bytes,
                reason = %reason,
                "child limit increase rejected"
            );
        }
        Ok(admission)
    }

    /// Disables every child of an exceeded reseller and returns how many
    /// children changed state. Never re-enables.
    pub fn enforce(&self, reseller_id: &str) -> Result<usize, LedgerError> {
        self.enforce_locked(reseller_id)
            .map(|outcome| outcome.disabled)
    }

    /// Enforces every reseller that carries a quota. Failures are collected
    /// per reseller and do not stop the pass.
    pub fn sweep(&self) -> Result<SweepReport, LedgerError> {
        let reseller_ids = self.store.reseller_ids()?;
        let mut report = SweepReport::start(reseller_ids.len());

        for reseller_id in &reseller_ids {
            match self.enforce_locked(reseller_id) {
                Ok(outcome) if !outcome.limited => {}
                Ok(outcome) => {
                    debug!(
                        reseller_id = %reseller_id,
                        exceeded = outcome.exceeded,
                        disabled = outcome.disabled,
                        "reseller checked"
                    );
                    report.record(reseller_id, outcome.exceeded, outcome.disabled);
                }
                Err(err) => {
                    error!(reseller_id = %reseller_id, error = %err, "enforcement failed");
                    report.record_failure(
                        reseller_id,
                        err.disabled_before_failure(),
                        err.to_string(),
                    );
                }
            }
        }

        let report = report.finish();
        info!(
            total_resellers = report.total_resellers,
            checked_resellers = report.checked_resellers,
            exceeded_resellers = report.exceeded_resellers,
            disabled_children = report.disabled_children,
            failures = report.failures.len(),
            "enforcement sweep completed"
        );
        Ok(report)
    }

    pub fn set_quota(&self, reseller_id: &str, quota_bytes: Option<i64>) -> Result<(), LedgerError> {
        let quota = quota_bytes.map(Quota::from_signed).transpose()?;
        self.apply_quota(reseller_id, quota)
    }

    pub fn set_quota_gb(&self, reseller_id: &str, quota_gb: Option<f64>) -> Result<(), LedgerError> {
        let quota = quota_gb.map(Quota::from_gb).transpose()?;
        self.apply_quota(reseller_id, quota)
    }

    pub fn usage_stats(&self, reseller_id: &str) -> Result<UsageStats, LedgerError> {
        let snapshot = self.snapshot(reseller_id)?;
        Ok(self.stats_of(&snapshot))
    }

    /// Stats for every reseller. Resellers whose stored record cannot be
    /// decoded are logged and left out; backend failures are returned.
    pub fn all_usage_stats(&self) -> Result<Vec<UsageStats>, LedgerError> {
        let reseller_ids = self.store.reseller_ids()?;
        let mut stats = Vec::with_capacity(reseller_ids.len());
        for reseller_id in &reseller_ids {
            match self.snapshot(reseller_id) {
                Ok(snapshot) => stats.push(self.stats_of(&snapshot)),
                Err(err @ LedgerError::InvalidQuota(_)) => {
                    error!(reseller_id = %reseller_id, error = %err, "skipping unreadable reseller");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(stats)
    }

    /// Appends an audit record for usage reported against `child_id`. The
    /// child's consumed-bytes counter is left untouched.
    pub fn record_usage(
        &self,
        child_id: &str,
        delta_bytes: u64,
        note: impl Into<String>,
    ) -> Result<UsageEvent, LedgerError> {
        let child = self
            .store
            .child(child_id)?
            .ok_or_else(|| LedgerError::ChildNotFound(child_id.to_string()))?;

        let event = UsageEvent::new(child.id, child.reseller_id, delta_bytes, note);
        self.store.append_usage_event(&event)?;

        debug!(
            child_id,
            reseller_id = event.reseller_id.as_deref().unwrap_or("-"),
            delta_bytes,
            "usage event recorded"
        );
        Ok(event)
    }

    /// Audit events attributed to `reseller_id`, newest first, bounded by
    /// `query`.
    pub fn usage_events(
        &self,
        reseller_id: &str,
        query: &EventQuery,
    ) -> Result<Vec<UsageEvent>, LedgerError> {
        self.resolve(reseller_id)?;
        Ok(self.store.usage_events(reseller_id, query)?)
    }

    pub fn child_usage_events(
        &self,
        child_id: &str,
        query: &EventQuery,
    ) -> Result<Vec<UsageEvent>, LedgerError> {
        if self.store.child(child_id)?.is_none() {
            return Err(LedgerError::ChildNotFound(child_id.to_string()));
        }
        Ok(self.store.child_usage_events(child_id, query)?)
    }

    fn apply_quota(&self, reseller_id: &str, quota: Option<Quota>) -> Result<(), LedgerError> {
        self.resolve(reseller_id)?;
        self.store.set_quota(reseller_id, quota)?;

        match quota {
            Some(quota) => info!(
                reseller_id,
                quota_bytes = quota.bytes(),
                quota = %quota,
                "reseller quota updated"
            ),
            None => info!(reseller_id, "reseller quota cleared"),
        }
        Ok(())
    }

    fn enforce_locked(&self, reseller_id: &str) -> Result<Enforcement, LedgerError> {
        // Resolve first so unknown ids never get a lock entry.
        let reseller = self.resolve(reseller_id)?;
        if reseller.quota.is_none() {
            return Ok(Enforcement {
                limited: false,
                exceeded: false,
                disabled: 0,
            });
        }

        let lock = self.enforce_lock(reseller_id);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let snapshot = self.snapshot_of(reseller)?;
        if !snapshot.is_exceeded() {
            return Ok(Enforcement {
                limited: true,
                exceeded: false,
                disabled: 0,
            });
        }

        warn!(
            reseller_id,
            aggregate = %format_gb(snapshot.aggregate),
            quota = %snapshot.reseller.quota.map(|q| q.to_string()).unwrap_or_default(),
            children = snapshot.children.len(),
            "reseller exceeded quota, disabling children"
        );

        let mut disabled = 0usize;
        for child in &snapshot.children {
            match self.store.disable_child(&child.id) {
                Ok(true) => disabled += 1,
                Ok(false) => {}
                Err(source) => {
                    error!(
                        reseller_id,
                        child_id = %child.id,
                        disabled,
                        error = %source,
                        "failed to disable child"
                    );
                    return Err(LedgerError::PartialEnforcement {
                        reseller_id: reseller_id.to_string(),
                        disabled,
                        source,
                    });
                }
            }
        }

        if disabled > 0 {
            warn!(reseller_id, disabled, "children disabled for exceeded quota");
        }
        Ok(Enforcement {
            limited: true,
            exceeded: true,
            disabled,
        })
    }

    fn enforce_lock(&self, reseller_id: &str) -> Arc<Mutex<()>> {
        self.enforce_locks
            .entry(reseller_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn stats_of(&self, snapshot: &Snapshot) -> UsageStats {
        let quota = snapshot.reseller.quota;
        let usage_percentage = policy::usage_percentage(quota, snapshot.aggregate);
        let warning = usage_percentage
            .map(|percentage| percentage > self.config.warning_threshold_percent)
            .unwrap_or(false);

        UsageStats {
            reseller_id: snapshot.reseller.id.clone(),
            name: snapshot.reseller.name.clone(),
            consumed_bytes: snapshot.aggregate,
            quota_bytes: quota.map(|quota| quota.bytes()),
            remaining: policy::remaining(quota, snapshot.aggregate),
            exceeded: snapshot.is_exceeded(),
            warning,
            usage_percentage,
            children_count: snapshot.children.len(),
            active_children_count: snapshot
                .children
                .iter()
                .filter(|child| child.enabled)
                .count(),
        }
    }

    fn resolve(&self, reseller_id: &str) -> Result<Reseller, LedgerError> {
        self.store
            .reseller(reseller_id)?
            .ok_or_else(|| LedgerError::ResellerNotFound(reseller_id.to_string()))
    }

    fn snapshot(&self, reseller_id: &str) -> Result<Snapshot, LedgerError> {
        let reseller = self.resolve(reseller_id)?;
        self.snapshot_of(reseller)
    }

    fn snapshot_of(&self, reseller: Reseller) -> Result<Snapshot, LedgerError> {
        let mut children = Vec::new();
        for member in self.member_resellers(&reseller.id)? {
            children.extend(self.store.children_of(&member)?);
        }
        let aggregate = children
            .iter()
            .fold(0u64, |total, child| total.saturating_add(child.consumed_bytes));

        Ok(Snapshot {
            reseller,
            children,
            aggregate,
        })
    }

    /// `root` followed by every transitive sub-reseller, each visited once.
    fn member_resellers(&self, root: &str) -> Result<Vec<String>, LedgerError> {
        let mut seen = HashSet::from([root.to_string()]);
        let mut members = vec![root.to_string()];
        let mut queue = VecDeque::from([root.to_string()]);

        while let Some(current) = queue.pop_front() {
            for sub in self.store.sub_resellers(&current)? {
                if seen.insert(sub.clone()) {
                    members.push(sub.clone());
                    queue.push_back(sub);
                }
            }
        }
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::RejectReason;
    use crate::model::ONE_GIG;
    use crate::store::MemoryStore;

    fn ledger_with(store: &Arc<MemoryStore>) -> QuotaLedger {
        QuotaLedger::new(Arc::clone(store) as Arc<dyn AccountStore>)
    }

    #[test]
    fn test_missing_reseller_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ledger_with(&store);

        assert!(matches!(
            ledger.is_exceeded("ghost"),
            Err(LedgerError::ResellerNotFound(_))
        ));
        assert!(ledger.can_admit("ghost", None).unwrap_err().is_not_found());
        assert!(ledger.enforce("ghost").unwrap_err().is_not_found());
        assert!(ledger.remaining("ghost").unwrap_err().is_not_found());
    }

    #[test]
    fn test_aggregate_reads_live_counters() {
        let store = Arc::new(MemoryStore::new());
        store.insert_reseller(Reseller::new("r1", "Reseller One"));
        store.insert_child(ChildAccount::new("c1", Some("r1"), 100));
        store.insert_child(ChildAccount::new("c2", Some("r1"), 50));
        store.insert_child(ChildAccount::new("other", Some("r2"), 999));
        let ledger = ledger_with(&store);

        assert_eq!(ledger.aggregate_usage("r1").unwrap(), 150);

        store.set_consumed_bytes("c1", 400).unwrap();
        assert_eq!(ledger.aggregate_usage("r1").unwrap(), 450);

        store.remove_child("c2");
        assert_eq!(ledger.aggregate_usage("r1").unwrap(), 400);
    }

    #[test]
    fn test_nested_resellers_are_aggregated_transitively() {
        let store = Arc::new(MemoryStore::new());
        store.insert_reseller(Reseller::new("top", "Top").with_quota(Quota::from_bytes(100)));
        store.insert_reseller(Reseller::new("mid", "Mid").with_parent("top"));
        store.insert_reseller(Reseller::new("leaf", "Leaf").with_parent("mid"));
        store.insert_child(ChildAccount::new("a", Some("top"), 10));
        store.insert_child(ChildAccount::new("b", Some("mid"), 20));
        store.insert_child(ChildAccount::new("c", Some("leaf"), 70));
        let ledger = ledger_with(&store);

        assert_eq!(ledger.aggregate_usage("top").unwrap(), 100);
        assert_eq!(ledger.aggregate_usage("mid").unwrap(), 90);
        assert!(ledger.is_exceeded("top").unwrap());
        assert_eq!(ledger.enforce("top").unwrap(), 3);
        assert!(!store.child("c").unwrap().unwrap().enabled);
    }

    #[test]
    fn test_cyclic_parent_chain_terminates() {
        let store = Arc::new(MemoryStore::new());
        store.insert_reseller(Reseller::new("a", "A").with_parent("b"));
        store.insert_reseller(Reseller::new("b", "B").with_parent("a"));
        store.insert_child(ChildAccount::new("c1", Some("a"), 5));
        store.insert_child(ChildAccount::new("c2", Some("b"), 7));
        let ledger = ledger_with(&store);

        assert_eq!(ledger.aggregate_usage("a").unwrap(), 12);
        assert_eq!(ledger.aggregate_usage("b").unwrap(), 12);
    }

    #[test]
    fn test_enforce_is_idempotent_and_never_reenables() {
        let store = Arc::new(MemoryStore::new());
        store.insert_reseller(Reseller::new("r1", "R1").with_quota(Quota::from_bytes(5 * ONE_GIG)));
        store.insert_child(ChildAccount::new("c1", Some("r1"), 2 * ONE_GIG));
        store.insert_child(ChildAccount::new("c2", Some("r1"), 3 * ONE_GIG));
        let ledger = ledger_with(&store);

        assert_eq!(ledger.enforce("r1").unwrap(), 2);
        assert_eq!(ledger.enforce("r1").unwrap(), 0);

        store.set_consumed_bytes("c2", 0).unwrap();
        assert!(!ledger.is_exceeded("r1").unwrap());
        assert_eq!(ledger.enforce("r1").unwrap(), 0);
        assert!(!store.child("c1").unwrap().unwrap().enabled);
        assert!(!store.child("c2").unwrap().unwrap().enabled);
    }

    #[test]
    fn test_partial_enforcement_reports_progress() {
        let store = Arc::new(MemoryStore::new());
        store.insert_reseller(Reseller::new("r1", "R1").with_quota(Quota::from_bytes(10)));
        store.insert_child(ChildAccount::new("a", Some("r1"), 5));
        store.insert_child(ChildAccount::new("b", Some("r1"), 5));
        store.insert_child(ChildAccount::new("c", Some("r1"), 5));
        store.fail_disable_for("b");
        let ledger = ledger_with(&store);

        let err = ledger.enforce("r1").unwrap_err();
        assert_eq!(err.disabled_before_failure(), Some(1));
        assert!(matches!(err, LedgerError::PartialEnforcement { .. }));
        assert!(!store.child("a").unwrap().unwrap().enabled);
        assert!(store.child("c").unwrap().unwrap().enabled);

        store.clear_failures();
        assert_eq!(ledger.enforce("r1").unwrap(), 2);
    }

    #[test]
    fn test_set_quota_validation() {
        let store = Arc::new(MemoryStore::new());
        store.insert_reseller(Reseller::new("r1", "R1"));
        let ledger = ledger_with(&store);

        assert!(matches!(
            ledger.set_quota("r1", Some(-5)),
            Err(LedgerError::InvalidQuota(_))
        ));
        assert!(matches!(
            ledger.set_quota("ghost", Some(5)),
            Err(LedgerError::ResellerNotFound(_))
        ));

        ledger.set_quota_gb("r1", Some(2.0)).unwrap();
        assert_eq!(ledger.remaining("r1").unwrap(), Remaining::Bytes(2 * ONE_GIG));

        ledger.set_quota("r1", None).unwrap();
        assert_eq!(ledger.remaining("r1").unwrap(), Remaining::Unlimited);
    }

    #[test]
    fn test_can_raise_child_limit() {
        let store = Arc::new(MemoryStore::new());
        store.insert_reseller(Reseller::new("r1", "R1").with_quota(Quota::from_bytes(100)));
        store.insert_reseller(Reseller::new("r2", "R2").with_quota(Quota::from_bytes(100)));
        store.insert_child(ChildAccount::new("c1", Some("r1"), 30));
        store.insert_child(ChildAccount::new("c2", Some("r1"), 40));
        store.insert_child(ChildAccount::new("foreign", Some("r2"), 1));
        let ledger = ledger_with(&store);

        assert!(ledger.can_raise_child_limit("r1", "c1", 60).unwrap().is_admitted());
        let rejected = ledger.can_raise_child_limit("r1", "c1", 61).unwrap();
        assert_eq!(
            rejected.reason(),
            Some(&RejectReason::WouldExceed { remaining: 30 })
        );
        assert!(matches!(
            ledger.can_raise_child_limit("r1", "foreign", 1),
            Err(LedgerError::ChildNotFound(_))
        ));
        assert!(matches!(
            ledger.can_raise_child_limit("r1", "ghost", 1),
            Err(LedgerError::ChildNotFound(_))
        ));
    }

    #[test]
    fn test_record_usage_does_not_touch_counters() {
        let store = Arc::new(MemoryStore::new());
        store.insert_reseller(Reseller::new("r1", "R1"));
        store.insert_child(ChildAccount::new("c1", Some("r1"), 10));
        let ledger = ledger_with(&store);

        let event = ledger.record_usage("c1", 500, "hourly metering").unwrap();
        assert_eq!(event.reseller_id.as_deref(), Some("r1"));
        assert_eq!(store.child("c1").unwrap().unwrap().consumed_bytes, 10);

        let events = ledger.usage_events("r1", &EventQuery::default()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].delta_bytes, 500);

        let later = chrono::Utc::now() + chrono::Duration::hours(1);
        let window = EventQuery::default().since(later);
        assert!(ledger.usage_events("r1", &window).unwrap().is_empty());
        assert!(matches!(
            ledger.record_usage("ghost", 1, ""),
            Err(LedgerError::ChildNotFound(_))
        ));
    }

    #[test]
    fn test_child_usage_events_are_capped() {
        let store = Arc::new(MemoryStore::new());
        store.insert_reseller(Reseller::new("r1", "R1"));
        store.insert_child(ChildAccount::new("c1", Some("r1"), 0));
        store.insert_child(ChildAccount::new("c2", Some("r1"), 0));
        let ledger = ledger_with(&store);

        for delta in 0..5 {
            ledger.record_usage("c1", delta, "tick").unwrap();
        }
        ledger.record_usage("c2", 99, "tick").unwrap();

        let query = EventQuery::default().limit(3);
        let events = ledger.child_usage_events("c1", &query).unwrap();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|event| event.child_id == "c1"));
        assert_eq!(
            ledger.usage_events("r1", &EventQuery::default()).unwrap().len(),
            6
        );
        assert!(matches!(
            ledger.child_usage_events("ghost", &query),
            Err(LedgerError::ChildNotFound(_))
        ));
    }

    #[test]
    fn test_unknown_resellers_leave_no_lock_behind() {
        let store = Arc::new(MemoryStore::new());
        store.insert_reseller(Reseller::new("r1", "R1").with_quota(Quota::from_bytes(10)));
        let ledger = ledger_with(&store);

        for i in 0..10 {
            assert!(ledger.enforce(&format!("ghost-{i}")).is_err());
        }
        assert!(ledger.enforce_locks.is_empty());

        ledger.enforce("r1").unwrap();
        assert_eq!(ledger.enforce_locks.len(), 1);
    }
}
