//! Usage aggregation: time-bucketed series over the append-only ledgers.
//! Reads only; coarse "current total" queries are served by the running
//! counters on the user row, never by scanning the logs.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::{Alias, Expr, Func};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, FromQueryResult, Order, QueryFilter, QueryOrder,
    QuerySelect, QueryTrait,
};

use crate::db::entities::{admin_usage_log, node_user_usage, user};
use crate::db::services::usage_service::hour_bucket;
use crate::db::services::ServiceError;

/// Dimension a usage series is grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageScope {
    User(i32),
    Admin(i32),
    Service(i32),
    Node(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Hour,
    Day,
}

impl Granularity {
    pub fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Granularity::Hour => hour_bucket(ts),
            Granularity::Day => ts
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
                .unwrap_or(ts),
        }
    }

    fn advance(&self, bucket: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Granularity::Hour => bucket + Duration::hours(1),
            Granularity::Day => bucket + Duration::days(1),
        }
    }
}

/// One point of a usage series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsagePoint {
    pub bucket_start: DateTime<Utc>,
    pub bytes: i64,
}

/// A finite usage series over `[start, end)`. Iteration is lazy and
/// densely zero-filled: every bucket in range yields a point, so callers
/// never have to distinguish "no data" from "zero usage". The series is
/// cheap to clone and can be iterated any number of times.
#[derive(Debug, Clone)]
pub struct UsageSeries {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    granularity: Granularity,
    sums: BTreeMap<DateTime<Utc>, i64>,
}

impl UsageSeries {
    pub fn iter(&self) -> UsageSeriesIter<'_> {
        UsageSeriesIter {
            series: self,
            cursor: self.start,
        }
    }

    /// Sum over every bucket in range.
    pub fn total(&self) -> i64 {
        self.sums.values().sum()
    }
}

impl<'a> IntoIterator for &'a UsageSeries {
    type Item = UsagePoint;
    type IntoIter = UsageSeriesIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct UsageSeriesIter<'a> {
    series: &'a UsageSeries,
    cursor: DateTime<Utc>,
}

impl Iterator for UsageSeriesIter<'_> {
    type Item = UsagePoint;

    fn next(&mut self) -> Option<UsagePoint> {
        if self.cursor >= self.series.end {
            return None;
        }
        let bucket_start = self.cursor;
        let bytes = self.series.sums.get(&bucket_start).copied().unwrap_or(0);
        self.cursor = self.series.granularity.advance(bucket_start);
        Some(UsagePoint { bucket_start, bytes })
    }
}

#[derive(FromQueryResult, Debug)]
struct UsageBucketRow {
    bucket: DateTime<Utc>,
    bytes: Option<i64>,
}

/// Builds the usage series for a scope over `[start, end)` at the given
/// granularity. Source rows are never mutated; day buckets are rolled up
/// from the stored hour buckets after the grouped query.
pub async fn get_usage_timeseries(
    db: &DatabaseConnection,
    scope: UsageScope,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    granularity: Granularity,
) -> Result<UsageSeries, ServiceError> {
    if end <= start {
        return Err(ServiceError::Validation(
            "usage series range must not be empty".to_string(),
        ));
    }
    let range_start = granularity.truncate(start);

    let rows: Vec<UsageBucketRow> = match scope {
        UsageScope::Admin(admin_id) => {
            admin_usage_log::Entity::find()
                .select_only()
                .column_as(admin_usage_log::Column::CreatedAt, "bucket")
                .column_as(
                    Expr::expr(Func::sum(Expr::col(admin_usage_log::Column::UsedTraffic)))
                        .cast_as(Alias::new("bigint")),
                    "bytes",
                )
                .filter(admin_usage_log::Column::AdminId.eq(admin_id))
                .filter(admin_usage_log::Column::CreatedAt.gte(range_start))
                .filter(admin_usage_log::Column::CreatedAt.lt(end))
                .group_by(admin_usage_log::Column::CreatedAt)
                .order_by(admin_usage_log::Column::CreatedAt, Order::Asc)
                .into_model::<UsageBucketRow>()
                .all(db)
                .await?
        }
        UsageScope::User(_) | UsageScope::Node(_) | UsageScope::Service(_) => {
            let mut query = node_user_usage::Entity::find()
                .select_only()
                .column_as(node_user_usage::Column::CreatedAt, "bucket")
                .column_as(
                    Expr::expr(Func::sum(Expr::col(node_user_usage::Column::UsedTraffic)))
                        .cast_as(Alias::new("bigint")),
                    "bytes",
                )
                .filter(node_user_usage::Column::CreatedAt.gte(range_start))
                .filter(node_user_usage::Column::CreatedAt.lt(end));
            query = match scope {
                UsageScope::User(user_id) => {
                    query.filter(node_user_usage::Column::UserId.eq(user_id))
                }
                UsageScope::Node(node_id) => {
                    query.filter(node_user_usage::Column::NodeId.eq(node_id))
                }
                UsageScope::Service(service_id) => query.filter(
                    node_user_usage::Column::UserId.in_subquery(
                        user::Entity::find()
                            .select_only()
                            .column(user::Column::Id)
                            .filter(user::Column::ServiceId.eq(service_id))
                            .into_query(),
                    ),
                ),
                UsageScope::Admin(_) => unreachable!(),
            };
            query
                .group_by(node_user_usage::Column::CreatedAt)
                .order_by(node_user_usage::Column::CreatedAt, Order::Asc)
                .into_model::<UsageBucketRow>()
                .all(db)
                .await?
        }
    };

    let mut sums = BTreeMap::new();
    for row in rows {
        *sums.entry(granularity.truncate(row.bucket)).or_insert(0) += row.bytes.unwrap_or(0);
    }

    Ok(UsageSeries {
        start: range_start,
        end,
        granularity,
        sums,
    })
}
