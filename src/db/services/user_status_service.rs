//! Limit & status engine: decides user status transitions from the current
//! counters, limits, and clock. The functions here are pure so ingestion,
//! admin edits, and the sweep all share one set of rules; callers persist
//! the outcome under their own transaction and row-version check.

use chrono::{DateTime, Utc};

use crate::db::entities::user::{self, NextPlan};
use crate::db::enums::UserStatus;

/// Reason recorded when a user runs out of data allowance.
pub const USER_DATA_LIMIT_REACHED_REASON_KEY: &str = "user_data_limit_reached";
/// Reason recorded when a user's expiry passes.
pub const USER_EXPIRED_REASON_KEY: &str = "user_expired";
/// Reason an admin is disabled when its aggregate data cap is consumed.
pub const ADMIN_DATA_LIMIT_EXHAUSTED_REASON_KEY: &str = "admin_data_limit_exhausted";

/// Outcome of re-evaluating a user after a usage delta: the column values
/// the caller should persist, plus the counter value to record in the reset
/// log when a next plan fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageEvaluation {
    pub status: UserStatus,
    pub used_traffic: i64,
    pub lifetime_used_traffic: i64,
    pub data_limit: i64,
    pub expire: i64,
    pub next_plan: Option<NextPlan>,
    pub reset_logged: Option<i64>,
    pub reason_key: Option<&'static str>,
}

pub fn data_limit_reached(data_limit: i64, used_traffic: i64) -> bool {
    data_limit > 0 && used_traffic >= data_limit
}

pub fn is_time_expired(expire: i64, now: DateTime<Utc>) -> bool {
    expire > 0 && now.timestamp() >= expire
}

/// The status a user should carry given its current counters and limits.
/// Data exhaustion is evaluated before expiry: when both are breached in
/// the same pass the user lands in `limited`, and that ordering is a
/// documented policy, not an accident of evaluation order.
pub fn refresh_status(
    status: &UserStatus,
    used_traffic: i64,
    data_limit: i64,
    expire: i64,
    on_hold_timeout: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> (UserStatus, Option<&'static str>) {
    match status {
        // Terminal until explicit admin action; never auto-transitioned.
        UserStatus::Disabled | UserStatus::Deleted => (status.clone(), None),
        // On-hold leaves only via explicit first-connect activation or by
        // the hold timeout elapsing.
        UserStatus::OnHold => match on_hold_timeout {
            Some(deadline) if now >= deadline => (UserStatus::Expired, Some(USER_EXPIRED_REASON_KEY)),
            _ => (UserStatus::OnHold, None),
        },
        UserStatus::Active | UserStatus::Limited | UserStatus::Expired => {
            let next = if data_limit_reached(data_limit, used_traffic) {
                UserStatus::Limited
            } else if is_time_expired(expire, now) {
                UserStatus::Expired
            } else {
                UserStatus::Active
            };
            let reason = match (&next, &next != status) {
                (UserStatus::Limited, true) => Some(USER_DATA_LIMIT_REACHED_REASON_KEY),
                (UserStatus::Expired, true) => Some(USER_EXPIRED_REASON_KEY),
                _ => None,
            };
            (next, reason)
        }
    }
}

/// Whether the configured next plan should activate for the given breach
/// state. `fire_on_either` fires on the first breach; otherwise both the
/// data limit and the expiry must be gone.
fn next_plan_fires(plan: &NextPlan, data_breached: bool, time_breached: bool) -> bool {
    if plan.fire_on_either {
        data_breached || time_breached
    } else {
        data_breached && time_breached
    }
}

/// Applies a usage delta to a user snapshot and computes the resulting
/// status, activating the next plan when the current one is exhausted.
///
/// The carry-over for `add_remaining_traffic` is measured against the
/// counter as it stood before this delta: the report that crosses the
/// limit is charged, but the allowance left unconsumed when the previous
/// report completed rolls into the new plan.
pub fn evaluate_usage(user: &user::Model, delta: i64, now: DateTime<Utc>) -> UsageEvaluation {
    let remaining_before = if user.data_limit > 0 {
        (user.data_limit - user.used_traffic).max(0)
    } else {
        0
    };

    let used = user.used_traffic + delta;
    let lifetime = user.lifetime_used_traffic + delta;

    let auto_states = matches!(
        user.status,
        UserStatus::Active | UserStatus::Limited | UserStatus::Expired
    );
    let data_breached = data_limit_reached(user.data_limit, used);
    let time_breached = is_time_expired(user.expire, now);

    if auto_states {
        if let Some(plan) = &user.next_plan {
            if next_plan_fires(plan, data_breached, time_breached) {
                let carry = if plan.add_remaining_traffic {
                    remaining_before
                } else {
                    0
                };
                let expire = if plan.expire > 0 {
                    now.timestamp() + plan.expire
                } else {
                    0
                };
                return UsageEvaluation {
                    status: UserStatus::Active,
                    used_traffic: 0,
                    lifetime_used_traffic: lifetime,
                    data_limit: plan.data_limit + carry,
                    expire,
                    next_plan: None,
                    reset_logged: Some(used),
                    reason_key: None,
                };
            }
        }
    }

    let (status, reason_key) = refresh_status(
        &user.status,
        used,
        user.data_limit,
        user.expire,
        user.on_hold_timeout,
        now,
    );

    UsageEvaluation {
        status,
        used_traffic: used,
        lifetime_used_traffic: lifetime,
        data_limit: user.data_limit,
        expire: user.expire,
        next_plan: user.next_plan.clone(),
        reset_logged: None,
        reason_key,
    }
}
