//! Usage ingestion: applies batches of per-user traffic deltas reported by
//! proxy nodes. Each report is charged in its own transaction under an
//! optimistic row-version check on the user, so concurrent node reports for
//! the same user never lose updates, and users that cross a limit are
//! flagged in the same ingestion pass that crossed it.

use chrono::{DateTime, Timelike, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use tracing::{error, info, warn};

use crate::db::entities::{admin_usage_log, node_user_usage, user, user_usage_reset_log};
use crate::db::enums::UserStatus;
use crate::db::services::user_status_service::{self, UsageEvaluation};
use crate::db::services::{admin_service, node_service, ServiceError};

/// How many times a conflicting user update is re-read and re-applied
/// before the row is surfaced as a transient failure.
pub const MAX_CONFLICT_RETRIES: usize = 3;

/// One row of a node usage report.
#[derive(Debug, Clone)]
pub struct UsageReport {
    pub username: String,
    pub delta_bytes: i64,
    pub reported_at: DateTime<Utc>,
}

/// Per-row ingestion outcome returned to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    Accepted,
    /// Malformed row: negative deltas are rejected, never clamped.
    NegativeDelta,
    /// The identifier matched no live user; the row is skipped.
    UnknownUser,
    /// Transient failure (conflict retries exhausted, storage error); the
    /// node should re-submit this row.
    Failed(String),
}

/// Floors a timestamp to the start of its hour bucket.
pub fn hour_bucket(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive()
        .and_hms_opt(ts.hour(), 0, 0)
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .unwrap_or(ts)
}

/// Ingests a usage report batch from one node. Rows succeed or fail
/// independently; only an unknown node rejects the batch as a whole, since
/// there is no ledger row to attribute the traffic to.
pub async fn record_usage(
    db: &DatabaseConnection,
    node_id: i32,
    reports: &[UsageReport],
) -> Result<Vec<ReportOutcome>, ServiceError> {
    let node = node_service::get_node_by_id(db, node_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("node {node_id}")))?;

    let mut outcomes = Vec::with_capacity(reports.len());
    for report in reports {
        if report.delta_bytes < 0 {
            warn!(
                node_id = node.id,
                username = %report.username,
                delta = report.delta_bytes,
                "rejecting malformed usage report with negative delta"
            );
            outcomes.push(ReportOutcome::NegativeDelta);
            continue;
        }
        match apply_report(db, node.id, report).await {
            Ok(true) => outcomes.push(ReportOutcome::Accepted),
            Ok(false) => {
                warn!(
                    node_id = node.id,
                    username = %report.username,
                    "skipping usage report for unknown user"
                );
                outcomes.push(ReportOutcome::UnknownUser);
            }
            Err(e) => {
                error!(
                    node_id = node.id,
                    username = %report.username,
                    error = %e,
                    "failed to apply usage report"
                );
                outcomes.push(ReportOutcome::Failed(e.to_string()));
            }
        }
    }

    node_service::touch_last_report(db, node.id, Utc::now()).await?;
    Ok(outcomes)
}

/// Applies one report under the optimistic retry loop. Returns Ok(false)
/// when the user does not exist (or is soft-deleted), which the batch
/// treats as a skip rather than a failure.
async fn apply_report(
    db: &DatabaseConnection,
    node_id: i32,
    report: &UsageReport,
) -> Result<bool, ServiceError> {
    let mut last_user_id = 0;
    for _attempt in 0..MAX_CONFLICT_RETRIES {
        let txn = db.begin().await?;

        let Some(current) = user::Entity::find()
            .filter(user::Column::Username.eq(&report.username))
            .one(&txn)
            .await?
        else {
            txn.rollback().await?;
            return Ok(false);
        };
        if current.status == UserStatus::Deleted {
            txn.rollback().await?;
            return Ok(false);
        }
        last_user_id = current.id;

        let now = Utc::now();
        let eval = user_status_service::evaluate_usage(&current, report.delta_bytes, now);

        match write_user_evaluation(&txn, &current, &eval, report.reported_at, now).await {
            Ok(()) => {}
            Err(DbErr::RecordNotUpdated) => {
                // Another writer got there first; re-read and re-apply.
                txn.rollback().await?;
                continue;
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(reset_value) = eval.reset_logged {
            user_usage_reset_log::ActiveModel {
                user_id: Set(current.id),
                used_traffic_at_reset: Set(reset_value),
                reset_at: Set(now),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
            info!(
                user_id = current.id,
                new_data_limit = eval.data_limit,
                "activated next plan and reset usage counter"
            );
        }
        if let Some(reason) = eval.reason_key {
            info!(
                user_id = current.id,
                status = %eval.status,
                reason = reason,
                "user status transition during ingestion"
            );
        }

        let bucket = hour_bucket(report.reported_at);
        bump_node_user_bucket(&txn, node_id, current.id, bucket, report.delta_bytes).await?;

        let admin_id = match current.admin_id {
            Some(id) => id,
            None => admin_service::get_master_admin(&txn).await?.id,
        };
        bump_admin_bucket(&txn, admin_id, bucket, report.delta_bytes).await?;
        admin_service::enforce_data_limit(&txn, admin_id).await?;

        txn.commit().await?;
        return Ok(true);
    }

    Err(ServiceError::Conflict {
        user_id: last_user_id,
        retries: MAX_CONFLICT_RETRIES,
    })
}

/// Persists the evaluated counters and status under the row-version check.
/// `DbErr::RecordNotUpdated` means another writer bumped the version since
/// our read, and the caller retries with fresh state.
async fn write_user_evaluation(
    txn: &DatabaseTransaction,
    current: &user::Model,
    eval: &UsageEvaluation,
    reported_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), DbErr> {
    // online_at only ever advances, regardless of report ordering.
    let online_at = match current.online_at {
        Some(seen) if seen >= reported_at => seen,
        _ => reported_at,
    };

    let update = user::ActiveModel {
        id: Set(current.id),
        status: Set(eval.status.clone()),
        used_traffic: Set(eval.used_traffic),
        lifetime_used_traffic: Set(eval.lifetime_used_traffic),
        data_limit: Set(eval.data_limit),
        expire: Set(eval.expire),
        next_plan: Set(eval.next_plan.clone()),
        online_at: Set(Some(online_at)),
        version: Set(current.version + 1),
        updated_at: Set(now),
        ..Default::default()
    };

    user::Entity::update(update)
        .filter(user::Column::Version.eq(current.version))
        .exec(txn)
        .await?;
    Ok(())
}

/// Increments the (bucket, node, user) ledger row, inserting it on first
/// touch. Runs inside the per-user transaction, so the conditional
/// update-then-insert cannot race itself for the same user.
async fn bump_node_user_bucket(
    txn: &DatabaseTransaction,
    node_id: i32,
    user_id: i32,
    bucket: DateTime<Utc>,
    delta: i64,
) -> Result<(), DbErr> {
    let updated = node_user_usage::Entity::update_many()
        .col_expr(
            node_user_usage::Column::UsedTraffic,
            Expr::col(node_user_usage::Column::UsedTraffic).add(delta),
        )
        .filter(node_user_usage::Column::NodeId.eq(node_id))
        .filter(node_user_usage::Column::UserId.eq(user_id))
        .filter(node_user_usage::Column::CreatedAt.eq(bucket))
        .exec(txn)
        .await?;
    if updated.rows_affected == 0 {
        node_user_usage::ActiveModel {
            created_at: Set(bucket),
            node_id: Set(node_id),
            user_id: Set(user_id),
            used_traffic: Set(delta),
            ..Default::default()
        }
        .insert(txn)
        .await?;
    }
    Ok(())
}

async fn bump_admin_bucket(
    txn: &DatabaseTransaction,
    admin_id: i32,
    bucket: DateTime<Utc>,
    delta: i64,
) -> Result<(), DbErr> {
    let updated = admin_usage_log::Entity::update_many()
        .col_expr(
            admin_usage_log::Column::UsedTraffic,
            Expr::col(admin_usage_log::Column::UsedTraffic).add(delta),
        )
        .filter(admin_usage_log::Column::AdminId.eq(admin_id))
        .filter(admin_usage_log::Column::CreatedAt.eq(bucket))
        .exec(txn)
        .await?;
    if updated.rows_affected == 0 {
        admin_usage_log::ActiveModel {
            created_at: Set(bucket),
            admin_id: Set(admin_id),
            used_traffic: Set(delta),
            ..Default::default()
        }
        .insert(txn)
        .await?;
    }
    Ok(())
}
