use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};

use crate::db::enums::{DataLimitResetStrategy, UserStatus};

/// Pending limit/expiry configuration swapped in when the current plan is
/// exhausted. `expire` is a duration in seconds from activation (0 keeps the
/// user unlimited in time); `fire_on_either` activates the plan as soon as
/// either the data limit or the expiry is breached, otherwise both must be.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct NextPlan {
    pub data_limit: i64,
    pub expire: i64,
    pub add_remaining_traffic: bool,
    pub fire_on_either: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub username: String,
    /// Owning admin; NULL falls back to the Master admin for accounting.
    pub admin_id: Option<i32>,
    pub status: UserStatus,
    /// Bytes consumed since the last counter reset.
    pub used_traffic: i64,
    /// Bytes consumed over the whole lifetime; survives resets.
    pub lifetime_used_traffic: i64,
    /// 0 = unlimited.
    pub data_limit: i64,
    pub data_limit_reset_strategy: DataLimitResetStrategy,
    /// Absolute expiry as epoch seconds; 0 = unlimited.
    pub expire: i64,
    pub credential_key: String,
    pub service_id: Option<i32>,
    #[sea_orm(column_type = "Json", nullable)]
    pub next_plan: Option<NextPlan>,
    /// Relative expiry armed on first connect, seconds; 0 = not on hold.
    pub on_hold_expire_duration: i64,
    /// Deadline for leaving on_hold before the user expires anyway.
    pub on_hold_timeout: Option<ChronoDateTimeUtc>,
    /// Per-user retention override for the autodelete sweep, days.
    pub auto_delete_in_days: Option<i64>,
    pub online_at: Option<ChronoDateTimeUtc>,
    pub note: Option<String>,
    /// Row version for optimistic concurrency; bumped by every write.
    pub version: i64,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::admin::Entity",
        from = "Column::AdminId",
        to = "super::admin::Column::Id"
    )]
    Admin,

    #[sea_orm(
        belongs_to = "super::service::Entity",
        from = "Column::ServiceId",
        to = "super::service::Column::Id"
    )]
    Service,

    #[sea_orm(has_many = "super::proxy::Entity")]
    Proxies,

    #[sea_orm(has_many = "super::node_user_usage::Entity")]
    NodeUserUsages,

    #[sea_orm(has_many = "super::user_usage_reset_log::Entity")]
    UsageResetLogs,
}

impl Related<super::admin::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Admin.def()
    }
}

impl Related<super::service::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Service.def()
    }
}

impl Related<super::proxy::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Proxies.def()
    }
}

impl Related<super::node_user_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::NodeUserUsages.def()
    }
}

impl Related<super::user_usage_reset_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UsageResetLogs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
