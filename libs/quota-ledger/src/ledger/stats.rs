use serde::{Deserialize, Serialize};

use crate::model::{Remaining, ONE_GIG};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub reseller_id: String,
    pub name: String,
    pub consumed_bytes: u64,
    pub quota_bytes: Option<u64>,
    pub remaining: Remaining,
    pub exceeded: bool,
    pub warning: bool,
    pub usage_percentage: Option<f64>,
    pub children_count: usize,
    pub active_children_count: usize,
}

impl UsageStats {
    pub fn consumed_gb(&self) -> f64 {
        self.consumed_bytes as f64 / ONE_GIG as f64
    }

    pub fn quota_gb(&self) -> Option<f64> {
        self.quota_bytes.map(|bytes| bytes as f64 / ONE_GIG as f64)
    }

    pub fn remaining_gb(&self) -> Option<f64> {
        self.remaining
            .bytes()
            .map(|bytes| bytes as f64 / ONE_GIG as f64)
    }
}
