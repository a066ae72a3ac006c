use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Per-admin usage ledger with the same hour-bucket shape as the node/user
/// ledger. Survives user hard-deletion, so admin aggregate history and the
/// admin data-limit cap stay durable.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "admin_usage_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Hour bucket start.
    pub created_at: ChronoDateTimeUtc,
    pub admin_id: i32,
    pub used_traffic: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::admin::Entity",
        from = "Column::AdminId",
        to = "super::admin::Column::Id"
    )]
    Admin,
}

impl Related<super::admin::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Admin.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
