//! Database layer: entity definitions, enums, service functions, and the
//! startup bootstrap that brings a fresh database up to the expected schema.

pub mod entities;
pub mod enums;
pub mod services;

use sea_orm::sea_query::Index;
use sea_orm::{
    ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, Schema,
};
use tokio::sync::OnceCell;
use tracing::info;

use crate::db::services::ServiceError;

/// Opens a connection pool against the configured database URL.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(database_url.to_owned());
    opt.max_connections(max_connections).sqlx_logging(false);
    Database::connect(opt).await
}

/// Brings the database to a usable state: creates any missing tables and
/// indexes, verifies the schema capabilities, and seeds the sentinel Master
/// admin and Master node rows. Safe to call repeatedly.
pub async fn ensure_ready(db: &DatabaseConnection) -> Result<(), ServiceError> {
    create_schema(db).await?;
    verify_schema(db).await?;
    services::admin_service::ensure_master_admin(db).await?;
    services::node_service::ensure_master_node(db).await?;
    Ok(())
}

static READY: OnceCell<()> = OnceCell::const_new();

/// Process-memoized [`ensure_ready`] for the daemon path, so startup code
/// paths that race (e.g. config reload) only probe the schema once.
pub async fn ensure_ready_once(db: &DatabaseConnection) -> Result<(), ServiceError> {
    READY
        .get_or_try_init(|| async {
            ensure_ready(db).await?;
            Ok::<(), ServiceError>(())
        })
        .await?;
    Ok(())
}

async fn create_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let builder = db.get_database_backend();
    let schema = Schema::new(builder);

    let mut tables = vec![
        schema.create_table_from_entity(entities::admin::Entity),
        schema.create_table_from_entity(entities::service::Entity),
        schema.create_table_from_entity(entities::service_admin::Entity),
        schema.create_table_from_entity(entities::user::Entity),
        schema.create_table_from_entity(entities::node::Entity),
        schema.create_table_from_entity(entities::proxy::Entity),
        schema.create_table_from_entity(entities::proxy_host::Entity),
        schema.create_table_from_entity(entities::node_user_usage::Entity),
        schema.create_table_from_entity(entities::user_usage_reset_log::Entity),
        schema.create_table_from_entity(entities::admin_usage_log::Entity),
    ];
    for stmt in tables.iter_mut() {
        stmt.if_not_exists();
        db.execute(builder.build(stmt)).await?;
    }

    let node_usage_bucket = Index::create()
        .name("idx_node_user_usages_bucket")
        .table(entities::node_user_usage::Entity)
        .col(entities::node_user_usage::Column::CreatedAt)
        .col(entities::node_user_usage::Column::NodeId)
        .col(entities::node_user_usage::Column::UserId)
        .unique()
        .if_not_exists()
        .to_owned();
    db.execute(builder.build(&node_usage_bucket)).await?;

    let admin_usage_bucket = Index::create()
        .name("idx_admin_usage_logs_bucket")
        .table(entities::admin_usage_log::Entity)
        .col(entities::admin_usage_log::Column::CreatedAt)
        .col(entities::admin_usage_log::Column::AdminId)
        .unique()
        .if_not_exists()
        .to_owned();
    db.execute(builder.build(&admin_usage_bucket)).await?;

    info!("database schema is up to date");
    Ok(())
}

/// Capability probe: every table the services touch must answer a trivial
/// query. A failure here is a fatal configuration error, never something to
/// paper over at call sites.
async fn verify_schema(db: &DatabaseConnection) -> Result<(), ServiceError> {
    entities::admin::Entity::find()
        .count(db)
        .await
        .map_err(|e| ServiceError::Consistency(format!("admins table unusable: {e}")))?;
    entities::user::Entity::find()
        .filter(entities::user::Column::Status.eq(enums::UserStatus::Deleted))
        .count(db)
        .await
        .map_err(|e| {
            ServiceError::Consistency(format!("users table rejects the deleted status: {e}"))
        })?;
    entities::node_user_usage::Entity::find()
        .count(db)
        .await
        .map_err(|e| ServiceError::Consistency(format!("usage ledger unusable: {e}")))?;
    Ok(())
}
