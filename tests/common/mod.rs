#![allow(dead_code)]

use chrono::{DateTime, Utc};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};

use warden_server::credentials::UuidCredentialService;
use warden_server::db;
use warden_server::db::entities::{admin, node, user};
use warden_server::db::enums::{AdminRole, DataLimitResetStrategy, UserStatus};
use warden_server::db::services::{
    admin_service, node_service, user_service, NewAdmin, NewUser, UsageReport,
};

/// In-memory SQLite with a single pooled connection; the schema and the
/// sentinel Master rows are bootstrapped exactly as the daemon would.
pub async fn setup_db() -> DatabaseConnection {
    let mut opt = ConnectOptions::new("sqlite::memory:".to_owned());
    opt.max_connections(1).sqlx_logging(false);
    let db = Database::connect(opt)
        .await
        .expect("connect to in-memory sqlite");
    db::ensure_ready(&db).await.expect("bootstrap schema");
    db
}

pub async fn master_node(db: &DatabaseConnection) -> node::Model {
    node_service::get_master_node(db)
        .await
        .expect("master node present")
}

pub async fn master_admin(db: &DatabaseConnection) -> admin::Model {
    admin_service::get_master_admin(db)
        .await
        .expect("master admin present")
}

pub fn new_user_input(username: &str, admin_id: Option<i32>, data_limit: i64) -> NewUser {
    NewUser {
        username: username.to_string(),
        admin_id,
        status: UserStatus::Active,
        data_limit,
        data_limit_reset_strategy: DataLimitResetStrategy::NoReset,
        expire: 0,
        service_id: None,
        next_plan: None,
        on_hold_expire_duration: 0,
        on_hold_timeout: None,
        auto_delete_in_days: None,
        note: None,
    }
}

pub async fn create_user(db: &DatabaseConnection, input: NewUser) -> user::Model {
    user_service::create_user(db, &UuidCredentialService, input)
        .await
        .expect("create user")
}

pub async fn create_admin(
    db: &DatabaseConnection,
    username: &str,
    users_limit: i64,
    data_limit: i64,
) -> admin::Model {
    admin_service::create_admin(
        db,
        NewAdmin {
            username: username.to_string(),
            password_hash: None,
            role: AdminRole::Standard,
            permissions: None,
            data_limit,
            users_limit,
        },
    )
    .await
    .expect("create admin")
}

pub fn report(username: &str, delta_bytes: i64, reported_at: DateTime<Utc>) -> UsageReport {
    UsageReport {
        username: username.to_string(),
        delta_bytes,
        reported_at,
    }
}

pub async fn fetch_user(db: &DatabaseConnection, user_id: i32) -> user::Model {
    user_service::get_user_by_id(db, user_id)
        .await
        .expect("query user")
        .expect("user exists")
}
