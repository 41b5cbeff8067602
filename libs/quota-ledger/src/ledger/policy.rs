//! Pure quota rules. Every function takes the freshly aggregated usage; none
//! of them touch storage.

use crate::model::{Quota, Remaining};

use super::admission::{Admission, RejectReason};

pub fn is_exceeded(quota: Option<Quota>, aggregate: u64) -> bool {
    match quota {
        Some(quota) => aggregate >= quota.bytes(),
        None => false,
    }
}

pub fn remaining(quota: Option<Quota>, aggregate: u64) -> Remaining {
    match quota {
        Some(quota) => Remaining::Bytes(quota.bytes().saturating_sub(aggregate)),
        None => Remaining::Unlimited,
    }
}

pub fn admit(quota: Option<Quota>, aggregate: u64, additional: Option<u64>) -> Admission {
    let Some(limit) = quota else {
        return Admission::Admitted;
    };

    if is_exceeded(quota, aggregate) {
        return Admission::rejected(RejectReason::QuotaExceeded);
    }

    match additional {
        Some(extra) if extra > 0 && aggregate.saturating_add(extra) > limit.bytes() => {
            Admission::rejected(RejectReason::WouldExceed {
                remaining: limit.bytes().saturating_sub(aggregate),
            })
        }
        _ => Admission::Admitted,
    }
}

/// Checks a new own-limit for one child against the usage of its siblings.
pub fn admit_child_limit(
    quota: Option<Quota>,
    aggregate: u64,
    siblings_usage: u64,
    new_limit: u64,
) -> Admission {
    let Some(limit) = quota else {
        return Admission::Admitted;
    };

    if siblings_usage.saturating_add(new_limit) > limit.bytes() {
        return Admission::rejected(RejectReason::WouldExceed {
            remaining: limit.bytes().saturating_sub(aggregate),
        });
    }
    Admission::Admitted
}

/// Share of the quota consumed, capped at 100. `None` when unlimited.
pub fn usage_percentage(quota: Option<Quota>, aggregate: u64) -> Option<f64> {
    let quota = quota?;
    if quota.bytes() == 0 {
        return Some(if aggregate > 0 { 100.0 } else { 0.0 });
    }
    let percentage = (aggregate as f64 / quota.bytes() as f64) * 100.0;
    Some(percentage.min(100.0))
}
