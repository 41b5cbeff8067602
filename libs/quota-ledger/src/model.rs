use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LedgerError;

pub const ONE_GIG: u64 = 1024 * 1024 * 1024;

/// A reseller's byte ceiling. Absence of a quota (unlimited) is modelled as
/// `Option<Quota>::None` by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quota(u64);

impl Quota {
    /// Largest quota any store can persist as a signed 64-bit column.
    pub const MAX_BYTES: u64 = i64::MAX as u64;

    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Like [`Quota::from_bytes`], but rejects values above [`Quota::MAX_BYTES`].
    pub fn checked_from_bytes(bytes: u64) -> Result<Self, LedgerError> {
        if bytes > Self::MAX_BYTES {
            return Err(LedgerError::InvalidQuota(format!(
                "quota of {bytes} bytes exceeds the maximum of {} bytes",
                Self::MAX_BYTES
            )));
        }
        Ok(Self(bytes))
    }

    pub fn from_signed(bytes: i64) -> Result<Self, LedgerError> {
        u64::try_from(bytes)
            .map(Self)
            .map_err(|_| LedgerError::InvalidQuota(format!("quota must not be negative, got {bytes}")))
    }

    pub fn from_gb(gb: f64) -> Result<Self, LedgerError> {
        if !gb.is_finite() {
            return Err(LedgerError::InvalidQuota(format!(
                "quota must be a finite number of GB, got {gb}"
            )));
        }
        if gb < 0.0 {
            return Err(LedgerError::InvalidQuota(format!(
                "quota must not be negative, got {gb} GB"
            )));
        }
        let bytes = gb * ONE_GIG as f64;
        // `MAX_BYTES as f64` rounds up to 2^63, so anything below it fits.
        if bytes >= Self::MAX_BYTES as f64 {
            return Err(LedgerError::InvalidQuota(format!(
                "quota of {gb} GB exceeds the maximum of {} bytes",
                Self::MAX_BYTES
            )));
        }
        Ok(Self(bytes as u64))
    }

    pub fn bytes(&self) -> u64 {
        self.0
    }

    pub fn as_gb(&self) -> f64 {
        self.0 as f64 / ONE_GIG as f64
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_gb(self.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reseller {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub quota: Option<Quota>,
}

impl Reseller {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id: None,
            quota: None,
        }
    }

    pub fn with_quota(mut self, quota: Quota) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildAccount {
    pub id: String,
    pub reseller_id: Option<String>,
    /// Maintained by traffic metering; never written by the ledger.
    pub consumed_bytes: u64,
    pub usage_limit: Option<u64>,
    pub enabled: bool,
}

impl ChildAccount {
    pub fn new(id: impl Into<String>, reseller_id: Option<&str>, consumed_bytes: u64) -> Self {
        Self {
            id: id.into(),
            reseller_id: reseller_id.map(str::to_string),
            consumed_bytes,
            usage_limit: None,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: Uuid,
    pub child_id: String,
    pub reseller_id: Option<String>,
    pub delta_bytes: u64,
    pub recorded_at: DateTime<Utc>,
    pub note: String,
}

impl UsageEvent {
    pub fn new(
        child_id: impl Into<String>,
        reseller_id: Option<String>,
        delta_bytes: u64,
        note: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            child_id: child_id.into(),
            reseller_id,
            delta_bytes,
            recorded_at: Utc::now(),
            note: note.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remaining {
    Unlimited,
    Bytes(u64),
}

impl Remaining {
    pub fn bytes(&self) -> Option<u64> {
        match self {
            Remaining::Unlimited => None,
            Remaining::Bytes(bytes) => Some(*bytes),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, Remaining::Unlimited)
    }
}

impl fmt::Display for Remaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Remaining::Unlimited => f.write_str("unlimited"),
            Remaining::Bytes(bytes) => f.write_str(&format_gb(*bytes)),
        }
    }
}

/// Renders a byte count in GB: whole values without decimals, others with two.
pub fn format_gb(bytes: u64) -> String {
    if bytes % ONE_GIG == 0 {
        format!("{} GB", bytes / ONE_GIG)
    } else {
        format!("{:.2} GB", bytes as f64 / ONE_GIG as f64)
    }
}
