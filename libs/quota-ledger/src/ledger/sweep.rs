use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one enforcement pass over every quota-bearing reseller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_resellers: usize,
    pub checked_resellers: usize,
    pub exceeded_resellers: usize,
    pub disabled_children: usize,
    /// Children suspended per checked reseller. Unlimited resellers are absent.
    pub suspended: BTreeMap<String, usize>,
    pub failures: BTreeMap<String, String>,
}

impl SweepReport {
    pub(crate) fn start(total_resellers: usize) -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            total_resellers,
            checked_resellers: 0,
            exceeded_resellers: 0,
            disabled_children: 0,
            suspended: BTreeMap::new(),
            failures: BTreeMap::new(),
        }
    }

    pub(crate) fn record(&mut self, reseller_id: &str, exceeded: bool, disabled: usize) {
        self.checked_resellers += 1;
        if exceeded {
            self.exceeded_resellers += 1;
        }
        self.disabled_children += disabled;
        self.suspended.insert(reseller_id.to_string(), disabled);
    }

    /// `disabled` is set when the failure interrupted an enforcement that had
    /// already started disabling children.
    pub(crate) fn record_failure(
        &mut self,
        reseller_id: &str,
        disabled: Option<usize>,
        error: String,
    ) {
        if let Some(disabled) = disabled {
            self.record(reseller_id, true, disabled);
        }
        self.failures.insert(reseller_id.to_string(), error);
    }

    pub(crate) fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
