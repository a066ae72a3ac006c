use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::AdminRole;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "admins")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub username: String,
    /// Opaque to the core; authentication happens upstream.
    pub password_hash: Option<String>,
    pub role: AdminRole,
    /// Nested capability grants, interpreted by the API layer.
    pub permissions: Option<Json>,
    /// Aggregate byte cap across all owned users; 0 = unlimited.
    pub data_limit: i64,
    /// Cap on owned (non-deleted) users; 0 = unlimited.
    pub users_limit: i64,
    pub is_disabled: bool,
    pub disabled_reason: Option<String>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::user::Entity")]
    Users,

    #[sea_orm(has_many = "super::admin_usage_log::Entity")]
    UsageLogs,

    #[sea_orm(has_many = "super::service_admin::Entity")]
    ServiceAdmins,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Users.def()
    }
}

impl Related<super::admin_usage_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UsageLogs.def()
    }
}

impl Related<super::service_admin::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ServiceAdmins.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
