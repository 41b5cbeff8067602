use serde::{Deserialize, Serialize};

pub const DEFAULT_WARNING_THRESHOLD_PERCENT: f64 = 90.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Usage percentage above which a reseller is reported in warning state.
    pub warning_threshold_percent: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            warning_threshold_percent: DEFAULT_WARNING_THRESHOLD_PERCENT,
        }
    }
}
