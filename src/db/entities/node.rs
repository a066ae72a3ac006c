use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::NodeStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "nodes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
    pub address: String,
    pub status: NodeStatus,
    /// Last connection error detail, if any.
    pub message: Option<String>,
    /// Sentinel flag for the local/primary node.
    pub is_master: bool,
    pub last_report_at: Option<ChronoDateTimeUtc>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::node_user_usage::Entity")]
    NodeUserUsages,
}

impl Related<super::node_user_usage::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::NodeUserUsages.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
