//! Periodic maintenance: counter resets per user reset-strategy and the
//! autodelete pass that purges long-inactive users. Every user is handled
//! in its own transaction, so a failure or interruption between users
//! always leaves valid state, and re-running within the same boundary
//! period is a no-op.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Months, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set, TransactionTrait,
};
use thiserror::Error;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::db::entities::{node_user_usage, proxy, user, user_usage_reset_log};
use crate::db::enums::{DataLimitResetStrategy, UserStatus};
use crate::db::services::usage_service::MAX_CONFLICT_RETRIES;
use crate::db::services::{user_status_service, ServiceError};

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("database error during sweep: {0}")]
    Database(#[from] DbErr),
    #[error("service error during sweep: {0}")]
    Service(#[from] ServiceError),
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub interval_secs: u64,
    /// Default retention window for inactive users, days; 0 disables the
    /// autodelete pass unless a user carries its own override.
    pub autodelete_days: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub resets: u64,
    pub purged: u64,
}

pub struct SweepService {
    db: DatabaseConnection,
    config: SweepConfig,
}

/// The next boundary after `last_reset` for the given strategy. Boundaries
/// are computed from the last recorded reset, not wall-clock calendar
/// edges.
pub fn next_reset_at(
    last_reset: DateTime<Utc>,
    strategy: &DataLimitResetStrategy,
) -> Option<DateTime<Utc>> {
    match strategy {
        DataLimitResetStrategy::NoReset => None,
        DataLimitResetStrategy::Daily => Some(last_reset + Duration::days(1)),
        DataLimitResetStrategy::Weekly => Some(last_reset + Duration::days(7)),
        DataLimitResetStrategy::Monthly => last_reset.checked_add_months(Months::new(1)),
        DataLimitResetStrategy::Year => last_reset.checked_add_months(Months::new(12)),
    }
}

impl SweepService {
    pub fn new(db: DatabaseConnection, config: SweepConfig) -> Arc<Self> {
        Arc::new(Self { db, config })
    }

    /// Runs the sweep on a fixed interval until the task is aborted.
    pub async fn run_periodic(self: Arc<Self>) {
        info!(
            interval_secs = self.config.interval_secs,
            "starting reset/autodelete sweep"
        );
        let mut ticker = interval(StdDuration::from_secs(self.config.interval_secs.max(1)));
        loop {
            ticker.tick().await;
            match self.run_sweep_cycle(Utc::now()).await {
                Ok(summary) => {
                    if summary.resets > 0 || summary.purged > 0 {
                        info!(
                            resets = summary.resets,
                            purged = summary.purged,
                            "sweep cycle finished"
                        );
                    }
                }
                Err(e) => error!(error = %e, "sweep cycle failed"),
            }
        }
    }

    /// One full pass: counter resets, then the autodelete purge. Exposed to
    /// the API layer and tests.
    pub async fn run_sweep_cycle(&self, now: DateTime<Utc>) -> Result<SweepSummary, SweepError> {
        let resets = self.run_reset_pass(now).await?;
        let purged = self.run_autodelete_pass(now).await?;
        Ok(SweepSummary { resets, purged })
    }

    async fn run_reset_pass(&self, now: DateTime<Utc>) -> Result<u64, SweepError> {
        let candidates: Vec<i32> = user::Entity::find()
            .filter(user::Column::DataLimitResetStrategy.ne(DataLimitResetStrategy::NoReset))
            .filter(user::Column::Status.ne(UserStatus::Deleted))
            .order_by_asc(user::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|u| u.id)
            .collect();

        let mut resets = 0;
        for user_id in candidates {
            match self.reset_user_if_due(user_id, now).await {
                Ok(true) => resets += 1,
                Ok(false) => {}
                // One user's failure must not starve the rest of the pass.
                Err(e) => warn!(user_id = user_id, error = %e, "reset pass failed for user"),
            }
        }
        Ok(resets)
    }

    /// Re-reads the user transactionally and resets its counter when the
    /// strategy boundary has elapsed. Resolves against in-flight ingestion
    /// through the same row-version check, so a reset and a concurrent
    /// usage increment never both win.
    async fn reset_user_if_due(
        &self,
        user_id: i32,
        now: DateTime<Utc>,
    ) -> Result<bool, SweepError> {
        for _attempt in 0..MAX_CONFLICT_RETRIES {
            let txn = self.db.begin().await?;

            let Some(current) = user::Entity::find_by_id(user_id).one(&txn).await? else {
                txn.rollback().await?;
                return Ok(false);
            };
            if current.status == UserStatus::Deleted
                || current.data_limit_reset_strategy == DataLimitResetStrategy::NoReset
            {
                txn.rollback().await?;
                return Ok(false);
            }

            let last_reset = user_usage_reset_log::Entity::find()
                .filter(user_usage_reset_log::Column::UserId.eq(user_id))
                .order_by_desc(user_usage_reset_log::Column::ResetAt)
                .one(&txn)
                .await?
                .map(|log| log.reset_at)
                .unwrap_or(current.created_at);

            let due_at = next_reset_at(last_reset, &current.data_limit_reset_strategy);
            match due_at {
                Some(due) if due <= now => {}
                _ => {
                    txn.rollback().await?;
                    return Ok(false);
                }
            }

            user_usage_reset_log::ActiveModel {
                user_id: Set(current.id),
                used_traffic_at_reset: Set(current.used_traffic),
                reset_at: Set(now),
                ..Default::default()
            }
            .insert(&txn)
            .await?;

            // A user limited purely by data usage comes back active; one
            // that is also past expiry stays expired.
            let (status, _) = user_status_service::refresh_status(
                &current.status,
                0,
                current.data_limit,
                current.expire,
                current.on_hold_timeout,
                now,
            );

            let update = user::ActiveModel {
                id: Set(current.id),
                used_traffic: Set(0),
                status: Set(status),
                version: Set(current.version + 1),
                updated_at: Set(now),
                ..Default::default()
            };
            match user::Entity::update(update)
                .filter(user::Column::Version.eq(current.version))
                .exec(&txn)
                .await
            {
                Ok(_) => {
                    txn.commit().await?;
                    info!(user_id = current.id, "reset usage counter");
                    return Ok(true);
                }
                Err(DbErr::RecordNotUpdated) => {
                    txn.rollback().await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(SweepError::Service(ServiceError::Conflict {
            user_id,
            retries: MAX_CONFLICT_RETRIES,
        }))
    }

    async fn run_autodelete_pass(&self, now: DateTime<Utc>) -> Result<u64, SweepError> {
        let candidates = user::Entity::find()
            .filter(user::Column::Status.is_in([
                UserStatus::Deleted,
                UserStatus::Expired,
                UserStatus::Limited,
            ]))
            .order_by_asc(user::Column::Id)
            .all(&self.db)
            .await?;

        let mut purged = 0;
        for candidate in candidates {
            let window_days = candidate
                .auto_delete_in_days
                .unwrap_or(self.config.autodelete_days);
            if window_days <= 0 {
                continue;
            }
            let last_activity = candidate.online_at.unwrap_or(candidate.updated_at);
            if now - last_activity < Duration::days(window_days) {
                continue;
            }
            match self.purge_user(candidate.id).await {
                Ok(()) => purged += 1,
                Err(e) => warn!(user_id = candidate.id, error = %e, "autodelete failed for user"),
            }
        }
        Ok(purged)
    }

    /// Hard-deletes a user together with its usage ledger and reset logs.
    /// The admin ledger stays: aggregate admin history survives user
    /// retention.
    async fn purge_user(&self, user_id: i32) -> Result<(), SweepError> {
        let txn = self.db.begin().await?;
        node_user_usage::Entity::delete_many()
            .filter(node_user_usage::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;
        user_usage_reset_log::Entity::delete_many()
            .filter(user_usage_reset_log::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;
        proxy::Entity::delete_many()
            .filter(proxy::Column::UserId.eq(user_id))
            .exec(&txn)
            .await?;
        user::Entity::delete_by_id(user_id).exec(&txn).await?;
        txn.commit().await?;
        info!(user_id = user_id, "purged inactive user");
        Ok(())
    }
}
