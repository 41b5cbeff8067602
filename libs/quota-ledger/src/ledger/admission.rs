use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::format_gb;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    QuotaExceeded,
    WouldExceed { remaining: u64 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::QuotaExceeded => f.write_str("quota already exceeded"),
            RejectReason::WouldExceed { remaining } => write!(
                f,
                "would exceed remaining quota, remaining = {}",
                format_gb(*remaining)
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Admission {
    Admitted,
    Rejected { reason: RejectReason },
}

impl Admission {
    pub fn rejected(reason: RejectReason) -> Self {
        Admission::Rejected { reason }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }

    pub fn reason(&self) -> Option<&RejectReason> {
        match self {
            Admission::Admitted => None,
            Admission::Rejected { reason } => Some(reason),
        }
    }

    /// `(admitted, reason)` pair as exposed to hosts that render messages.
    pub fn into_parts(self) -> (bool, Option<String>) {
        match self {
            Admission::Admitted => (true, None),
            Admission::Rejected { reason } => (false, Some(reason.to_string())),
        }
    }
}
