//! Services: named groups of proxy hosts with an admin allowlist. Users
//! reference a service for host assignment; deleting one requires a
//! declared disposition for its users.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use tracing::info;

use crate::db::entities::{admin, proxy_host, service, service_admin, user};
use crate::db::enums::UserStatus;
use crate::db::services::ServiceError;

#[derive(Debug, Clone)]
pub struct NewProxyHost {
    pub remark: String,
    pub address: String,
    pub port: i32,
    pub sni: Option<String>,
    pub host: Option<String>,
}

/// Declared disposition for a service's users when the service is removed.
#[derive(Debug, Clone)]
pub enum ServiceRemovalDisposition {
    DeleteUsers,
    TransferUsersTo { service_id: i32 },
}

pub async fn get_service_by_id<C: ConnectionTrait>(
    conn: &C,
    service_id: i32,
) -> Result<Option<service::Model>, ServiceError> {
    Ok(service::Entity::find_by_id(service_id).one(conn).await?)
}

pub async fn create_service(
    db: &DatabaseConnection,
    name: &str,
) -> Result<service::Model, ServiceError> {
    if service::Entity::find()
        .filter(service::Column::Name.eq(name))
        .one(db)
        .await?
        .is_some()
    {
        return Err(ServiceError::Validation(format!(
            "service name {name} already exists"
        )));
    }
    let created = service::ActiveModel {
        name: Set(name.to_string()),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(created)
}

pub async fn add_host(
    db: &DatabaseConnection,
    service_id: i32,
    input: NewProxyHost,
) -> Result<proxy_host::Model, ServiceError> {
    get_service_by_id(db, service_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("service {service_id}")))?;
    let created = proxy_host::ActiveModel {
        service_id: Set(service_id),
        remark: Set(input.remark),
        address: Set(input.address),
        port: Set(input.port),
        sni: Set(input.sni),
        host: Set(input.host),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(created)
}

pub async fn list_hosts(
    db: &DatabaseConnection,
    service_id: i32,
) -> Result<Vec<proxy_host::Model>, ServiceError> {
    Ok(proxy_host::Entity::find()
        .filter(proxy_host::Column::ServiceId.eq(service_id))
        .order_by_asc(proxy_host::Column::Id)
        .all(db)
        .await?)
}

/// Puts the admin on the service's allowlist. Idempotent.
pub async fn allow_admin(
    db: &DatabaseConnection,
    service_id: i32,
    admin_id: i32,
) -> Result<(), ServiceError> {
    get_service_by_id(db, service_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("service {service_id}")))?;
    let exists = service_admin::Entity::find_by_id((service_id, admin_id))
        .one(db)
        .await?
        .is_some();
    if !exists {
        service_admin::ActiveModel {
            service_id: Set(service_id),
            admin_id: Set(admin_id),
        }
        .insert(db)
        .await?;
    }
    Ok(())
}

pub async fn disallow_admin(
    db: &DatabaseConnection,
    service_id: i32,
    admin_id: i32,
) -> Result<(), ServiceError> {
    service_admin::Entity::delete_by_id((service_id, admin_id))
        .exec(db)
        .await?;
    Ok(())
}

/// Allowlist gate used when an admin places a user on a service. Sudo and
/// full-access admins bypass the list.
pub async fn assert_admin_allowed<C: ConnectionTrait>(
    conn: &C,
    service_id: i32,
    admin: &admin::Model,
) -> Result<(), ServiceError> {
    get_service_by_id(conn, service_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("service {service_id}")))?;
    if admin.role.is_unrestricted() {
        return Ok(());
    }
    let allowed = service_admin::Entity::find_by_id((service_id, admin.id))
        .one(conn)
        .await?
        .is_some();
    if !allowed {
        return Err(ServiceError::Validation(format!(
            "admin {} is not allowlisted for service {service_id}",
            admin.username
        )));
    }
    Ok(())
}

/// Removes a service after resolving its users per the declared
/// disposition: soft-delete them, or move them to another service.
pub async fn remove_service(
    db: &DatabaseConnection,
    service_id: i32,
    disposition: ServiceRemovalDisposition,
) -> Result<(), ServiceError> {
    get_service_by_id(db, service_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("service {service_id}")))?;

    let txn = db.begin().await?;
    let now = Utc::now();

    match disposition {
        ServiceRemovalDisposition::TransferUsersTo {
            service_id: target_id,
        } => {
            if target_id == service_id {
                return Err(ServiceError::Validation(
                    "cannot transfer users to the service being removed".to_string(),
                ));
            }
            get_service_by_id(&txn, target_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("service {target_id}")))?;
            user::Entity::update_many()
                .col_expr(user::Column::ServiceId, Expr::value(target_id))
                .col_expr(
                    user::Column::Version,
                    Expr::col(user::Column::Version).add(1),
                )
                .col_expr(user::Column::UpdatedAt, Expr::value(now))
                .filter(user::Column::ServiceId.eq(service_id))
                .exec(&txn)
                .await?;
        }
        ServiceRemovalDisposition::DeleteUsers => {
            user::Entity::update_many()
                .col_expr(user::Column::Status, Expr::value(UserStatus::Deleted))
                .col_expr(
                    user::Column::Version,
                    Expr::col(user::Column::Version).add(1),
                )
                .col_expr(user::Column::UpdatedAt, Expr::value(now))
                .filter(user::Column::ServiceId.eq(service_id))
                .filter(user::Column::Status.ne(UserStatus::Deleted))
                .exec(&txn)
                .await?;
            // Rows that were already soft-deleted still reference the
            // service; detach them before the service row goes away.
            user::Entity::update_many()
                .col_expr(user::Column::ServiceId, Expr::value(Option::<i32>::None))
                .col_expr(
                    user::Column::Version,
                    Expr::col(user::Column::Version).add(1),
                )
                .filter(user::Column::ServiceId.eq(service_id))
                .exec(&txn)
                .await?;
        }
    }

    proxy_host::Entity::delete_many()
        .filter(proxy_host::Column::ServiceId.eq(service_id))
        .exec(&txn)
        .await?;
    service_admin::Entity::delete_many()
        .filter(service_admin::Column::ServiceId.eq(service_id))
        .exec(&txn)
        .await?;
    service::Entity::delete_by_id(service_id).exec(&txn).await?;

    txn.commit().await?;
    info!(service_id = service_id, "removed service");
    Ok(())
}
