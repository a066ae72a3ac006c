use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Raw ingestion ledger: one row per (hour bucket, node, user). Rows are
/// inserted or incremented within the current bucket and never rewritten
/// afterwards; aggregation treats the table as append-only.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "node_user_usages")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Hour bucket start.
    pub created_at: ChronoDateTimeUtc,
    pub node_id: i32,
    pub user_id: i32,
    pub used_traffic: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::node::Entity",
        from = "Column::NodeId",
        to = "super::node::Column::Id"
    )]
    Node,

    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::node::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Node.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
