//! Node records: remote proxy servers reporting usage, plus the sentinel
//! Master node representing the local/primary server.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use tracing::info;

use crate::db::entities::node;
use crate::db::enums::NodeStatus;
use crate::db::services::ServiceError;

/// Well-known name of the sentinel node for the local server.
pub const MASTER_NODE_NAME: &str = "master";

#[derive(Debug, Clone)]
pub struct NewNode {
    pub name: String,
    pub address: String,
}

/// Creates the sentinel Master node if it does not exist yet.
pub async fn ensure_master_node(db: &DatabaseConnection) -> Result<node::Model, ServiceError> {
    if let Some(existing) = node::Entity::find()
        .filter(node::Column::Name.eq(MASTER_NODE_NAME))
        .one(db)
        .await?
    {
        return Ok(existing);
    }
    let now = Utc::now();
    let created = node::ActiveModel {
        name: Set(MASTER_NODE_NAME.to_string()),
        address: Set("127.0.0.1".to_string()),
        status: Set(NodeStatus::Connected),
        message: Set(None),
        is_master: Set(true),
        last_report_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;
    info!(node_id = created.id, "created master node");
    Ok(created)
}

pub async fn get_master_node<C: ConnectionTrait>(conn: &C) -> Result<node::Model, ServiceError> {
    node::Entity::find()
        .filter(node::Column::Name.eq(MASTER_NODE_NAME))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::Consistency("master node row is missing".to_string()))
}

pub async fn get_node_by_id<C: ConnectionTrait>(
    conn: &C,
    node_id: i32,
) -> Result<Option<node::Model>, ServiceError> {
    Ok(node::Entity::find_by_id(node_id).one(conn).await?)
}

pub async fn create_node(
    db: &DatabaseConnection,
    input: NewNode,
) -> Result<node::Model, ServiceError> {
    if node::Entity::find()
        .filter(node::Column::Name.eq(&input.name))
        .one(db)
        .await?
        .is_some()
    {
        return Err(ServiceError::Validation(format!(
            "node name {} already exists",
            input.name
        )));
    }
    let now = Utc::now();
    let created = node::ActiveModel {
        name: Set(input.name),
        address: Set(input.address),
        status: Set(NodeStatus::Connecting),
        message: Set(None),
        is_master: Set(false),
        last_report_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(created)
}

pub async fn list_nodes(db: &DatabaseConnection) -> Result<Vec<node::Model>, ServiceError> {
    Ok(node::Entity::find()
        .order_by_asc(node::Column::Id)
        .all(db)
        .await?)
}

pub async fn set_node_status(
    db: &DatabaseConnection,
    node_id: i32,
    status: NodeStatus,
    message: Option<String>,
) -> Result<node::Model, ServiceError> {
    let existing = get_node_by_id(db, node_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("node {node_id}")))?;
    let mut active: node::ActiveModel = existing.into();
    active.status = Set(status);
    active.message = Set(message);
    active.updated_at = Set(Utc::now());
    Ok(active.update(db).await?)
}

/// Stamps the last usage-report time and marks the node connected.
pub async fn touch_last_report<C: ConnectionTrait>(
    conn: &C,
    node_id: i32,
    at: DateTime<Utc>,
) -> Result<(), ServiceError> {
    node::Entity::update_many()
        .col_expr(node::Column::LastReportAt, Expr::value(at))
        .col_expr(node::Column::Status, Expr::value(NodeStatus::Connected))
        .col_expr(node::Column::UpdatedAt, Expr::value(at))
        .filter(node::Column::Id.eq(node_id))
        .exec(conn)
        .await?;
    Ok(())
}
