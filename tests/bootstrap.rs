mod common;

use common::setup_db;
use warden_server::db;
use warden_server::db::enums::{AdminRole, NodeStatus};
use warden_server::db::services::{admin_service, node_service};

#[tokio::test]
async fn bootstrap_is_idempotent() {
    let db = setup_db().await;
    // Second pass must not fail or duplicate the sentinel rows.
    db::ensure_ready(&db).await.unwrap();
    db::ensure_ready(&db).await.unwrap();

    let admin = admin_service::get_master_admin(&db).await.unwrap();
    assert_eq!(admin.username, admin_service::MASTER_ADMIN_USERNAME);
    assert_eq!(admin.role, AdminRole::FullAccess);

    let node = node_service::get_master_node(&db).await.unwrap();
    assert_eq!(node.name, node_service::MASTER_NODE_NAME);
    assert!(node.is_master);
    assert_eq!(node.status, NodeStatus::Connected);
}

#[tokio::test]
async fn master_rows_are_created_exactly_once() {
    let db = setup_db().await;
    db::ensure_ready(&db).await.unwrap();

    use sea_orm::{EntityTrait, PaginatorTrait};
    use warden_server::db::entities::{admin, node};
    assert_eq!(admin::Entity::find().count(&db).await.unwrap(), 1);
    assert_eq!(node::Entity::find().count(&db).await.unwrap(), 1);
}
