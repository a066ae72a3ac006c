//! Admin accounts: tenant owners with aggregate caps over their users.

use chrono::Utc;
use sea_orm::sea_query::{Alias, Expr, Func};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    FromQueryResult, PaginatorTrait, QueryFilter, QuerySelect, Set, TransactionTrait,
};
use tracing::{info, warn};

use crate::db::entities::{admin, admin_usage_log, service_admin, user};
use crate::db::enums::{AdminRole, UserStatus};
use crate::db::services::user_status_service::ADMIN_DATA_LIMIT_EXHAUSTED_REASON_KEY;
use crate::db::services::ServiceError;

/// Well-known username of the sentinel admin that owns orphaned users.
pub const MASTER_ADMIN_USERNAME: &str = "master";

#[derive(Debug, Clone)]
pub struct NewAdmin {
    pub username: String,
    pub password_hash: Option<String>,
    pub role: AdminRole,
    pub permissions: Option<serde_json::Value>,
    pub data_limit: i64,
    pub users_limit: i64,
}

/// Validated admin modification; `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct AdminModify {
    pub password_hash: Option<String>,
    pub role: Option<AdminRole>,
    pub permissions: Option<serde_json::Value>,
    pub data_limit: Option<i64>,
    pub users_limit: Option<i64>,
}

/// Declared disposition for an admin's users when the admin is removed.
#[derive(Debug, Clone)]
pub enum AdminRemovalDisposition {
    ReassignUsers { to_admin_id: i32 },
    CascadeUsers,
}

/// Creates the sentinel Master admin if it does not exist yet.
pub async fn ensure_master_admin(db: &DatabaseConnection) -> Result<admin::Model, ServiceError> {
    if let Some(existing) = admin::Entity::find()
        .filter(admin::Column::Username.eq(MASTER_ADMIN_USERNAME))
        .one(db)
        .await?
    {
        return Ok(existing);
    }
    let now = Utc::now();
    let created = admin::ActiveModel {
        username: Set(MASTER_ADMIN_USERNAME.to_string()),
        password_hash: Set(None),
        role: Set(AdminRole::FullAccess),
        permissions: Set(None),
        data_limit: Set(0),
        users_limit: Set(0),
        is_disabled: Set(false),
        disabled_reason: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;
    info!(admin_id = created.id, "created master admin");
    Ok(created)
}

pub async fn get_master_admin<C: ConnectionTrait>(conn: &C) -> Result<admin::Model, ServiceError> {
    admin::Entity::find()
        .filter(admin::Column::Username.eq(MASTER_ADMIN_USERNAME))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::Consistency("master admin row is missing".to_string()))
}

pub async fn get_admin_by_id<C: ConnectionTrait>(
    conn: &C,
    admin_id: i32,
) -> Result<Option<admin::Model>, ServiceError> {
    Ok(admin::Entity::find_by_id(admin_id).one(conn).await?)
}

pub async fn get_admin_by_username<C: ConnectionTrait>(
    conn: &C,
    username: &str,
) -> Result<Option<admin::Model>, ServiceError> {
    Ok(admin::Entity::find()
        .filter(admin::Column::Username.eq(username))
        .one(conn)
        .await?)
}

pub async fn create_admin(
    db: &DatabaseConnection,
    input: NewAdmin,
) -> Result<admin::Model, ServiceError> {
    if get_admin_by_username(db, &input.username).await?.is_some() {
        return Err(ServiceError::Validation(format!(
            "admin username {} already exists",
            input.username
        )));
    }
    let now = Utc::now();
    let created = admin::ActiveModel {
        username: Set(input.username),
        password_hash: Set(input.password_hash),
        role: Set(input.role),
        permissions: Set(input.permissions),
        data_limit: Set(input.data_limit),
        users_limit: Set(input.users_limit),
        is_disabled: Set(false),
        disabled_reason: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(created)
}

pub async fn apply_admin_modify(
    db: &DatabaseConnection,
    admin_id: i32,
    modify: AdminModify,
) -> Result<admin::Model, ServiceError> {
    let existing = get_admin_by_id(db, admin_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("admin {admin_id}")))?;

    let mut active: admin::ActiveModel = existing.into();
    if let Some(hash) = modify.password_hash {
        active.password_hash = Set(Some(hash));
    }
    if let Some(role) = modify.role {
        active.role = Set(role);
    }
    if let Some(permissions) = modify.permissions {
        active.permissions = Set(Some(permissions));
    }
    if let Some(data_limit) = modify.data_limit {
        active.data_limit = Set(data_limit);
    }
    if let Some(users_limit) = modify.users_limit {
        active.users_limit = Set(users_limit);
    }
    active.updated_at = Set(Utc::now());
    Ok(active.update(db).await?)
}

pub async fn disable_admin(
    db: &DatabaseConnection,
    admin_id: i32,
    reason: &str,
) -> Result<admin::Model, ServiceError> {
    let existing = get_admin_by_id(db, admin_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("admin {admin_id}")))?;
    let mut active: admin::ActiveModel = existing.into();
    active.is_disabled = Set(true);
    active.disabled_reason = Set(Some(reason.to_string()));
    active.updated_at = Set(Utc::now());
    Ok(active.update(db).await?)
}

pub async fn enable_admin(
    db: &DatabaseConnection,
    admin_id: i32,
) -> Result<admin::Model, ServiceError> {
    let existing = get_admin_by_id(db, admin_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("admin {admin_id}")))?;
    let mut active: admin::ActiveModel = existing.into();
    active.is_disabled = Set(false);
    active.disabled_reason = Set(None);
    active.updated_at = Set(Utc::now());
    Ok(active.update(db).await?)
}

/// Number of owned users that still count against `users_limit`.
pub async fn count_active_users<C: ConnectionTrait>(
    conn: &C,
    admin_id: i32,
) -> Result<u64, ServiceError> {
    Ok(user::Entity::find()
        .filter(user::Column::AdminId.eq(admin_id))
        .filter(user::Column::Status.ne(UserStatus::Deleted))
        .count(conn)
        .await?)
}

#[derive(FromQueryResult, Debug)]
struct ConsumedTraffic {
    total: Option<i64>,
}

/// Total bytes ever charged to the admin's usage ledger.
pub async fn consumed_traffic<C: ConnectionTrait>(
    conn: &C,
    admin_id: i32,
) -> Result<i64, ServiceError> {
    let row: Option<ConsumedTraffic> = admin_usage_log::Entity::find()
        .select_only()
        .column_as(
            Expr::expr(Func::sum(Expr::col(admin_usage_log::Column::UsedTraffic)))
                .cast_as(Alias::new("bigint")),
            "total",
        )
        .filter(admin_usage_log::Column::AdminId.eq(admin_id))
        .into_model::<ConsumedTraffic>()
        .one(conn)
        .await?;
    Ok(row.and_then(|r| r.total).unwrap_or(0))
}

/// Admission gate for user creation: both the user-count cap and the data
/// cap must leave room. Rejection carries no partial effect.
pub async fn assert_can_add_user<C: ConnectionTrait>(
    conn: &C,
    admin: &admin::Model,
) -> Result<(), ServiceError> {
    if admin.users_limit > 0 {
        let owned = count_active_users(conn, admin.id).await?;
        if owned >= admin.users_limit as u64 {
            return Err(ServiceError::UsersLimitReached {
                limit: admin.users_limit,
            });
        }
    }
    assert_can_grant_allowance(conn, admin).await
}

/// Admission gate for granting new allowance (user creation, data-limit
/// increases, manual resets): rejected once the admin's consumed ledger has
/// reached its aggregate cap.
pub async fn assert_can_grant_allowance<C: ConnectionTrait>(
    conn: &C,
    admin: &admin::Model,
) -> Result<(), ServiceError> {
    if admin.data_limit > 0 {
        let consumed = consumed_traffic(conn, admin.id).await?;
        if consumed >= admin.data_limit {
            return Err(ServiceError::AdminDataLimitExceeded);
        }
    }
    Ok(())
}

/// Reactive aggregate cap: disables the admin once its ledger reaches the
/// configured data limit. Returns whether the admin was disabled by this
/// call. Already-disabled admins are left untouched.
pub async fn enforce_data_limit<C: ConnectionTrait>(
    conn: &C,
    admin_id: i32,
) -> Result<bool, ServiceError> {
    let Some(admin) = get_admin_by_id(conn, admin_id).await? else {
        return Ok(false);
    };
    if admin.is_disabled || admin.data_limit <= 0 {
        return Ok(false);
    }
    let consumed = consumed_traffic(conn, admin_id).await?;
    if consumed < admin.data_limit {
        return Ok(false);
    }
    let result = admin::Entity::update_many()
        .col_expr(admin::Column::IsDisabled, Expr::value(true))
        .col_expr(
            admin::Column::DisabledReason,
            Expr::value(ADMIN_DATA_LIMIT_EXHAUSTED_REASON_KEY),
        )
        .col_expr(admin::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(admin::Column::Id.eq(admin_id))
        .filter(admin::Column::IsDisabled.eq(false))
        .exec(conn)
        .await?;
    if result.rows_affected > 0 {
        warn!(
            admin_id = admin_id,
            consumed = consumed,
            data_limit = admin.data_limit,
            reason = ADMIN_DATA_LIMIT_EXHAUSTED_REASON_KEY,
            "admin aggregate data limit exhausted, admin disabled"
        );
    }
    Ok(result.rows_affected > 0)
}

/// Removes an admin after resolving ownership of its users per the declared
/// disposition. The Master admin cannot be removed.
pub async fn remove_admin(
    db: &DatabaseConnection,
    admin_id: i32,
    disposition: AdminRemovalDisposition,
) -> Result<(), ServiceError> {
    let admin = get_admin_by_id(db, admin_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("admin {admin_id}")))?;
    if admin.username == MASTER_ADMIN_USERNAME {
        return Err(ServiceError::Validation(
            "the master admin cannot be removed".to_string(),
        ));
    }

    let txn = db.begin().await?;
    let now = Utc::now();

    match disposition {
        AdminRemovalDisposition::ReassignUsers { to_admin_id } => {
            if get_admin_by_id(&txn, to_admin_id).await?.is_none() {
                return Err(ServiceError::NotFound(format!("admin {to_admin_id}")));
            }
            user::Entity::update_many()
                .col_expr(user::Column::AdminId, Expr::value(to_admin_id))
                .col_expr(
                    user::Column::Version,
                    Expr::col(user::Column::Version).add(1),
                )
                .col_expr(user::Column::UpdatedAt, Expr::value(now))
                .filter(user::Column::AdminId.eq(admin_id))
                .exec(&txn)
                .await?;
        }
        AdminRemovalDisposition::CascadeUsers => {
            user::Entity::update_many()
                .col_expr(user::Column::Status, Expr::value(UserStatus::Deleted))
                .col_expr(
                    user::Column::Version,
                    Expr::col(user::Column::Version).add(1),
                )
                .col_expr(user::Column::UpdatedAt, Expr::value(now))
                .filter(user::Column::AdminId.eq(admin_id))
                .filter(user::Column::Status.ne(UserStatus::Deleted))
                .exec(&txn)
                .await?;
        }
    }

    service_admin::Entity::delete_many()
        .filter(service_admin::Column::AdminId.eq(admin_id))
        .exec(&txn)
        .await?;
    admin_usage_log::Entity::delete_many()
        .filter(admin_usage_log::Column::AdminId.eq(admin_id))
        .exec(&txn)
        .await?;
    admin::Entity::delete_by_id(admin_id).exec(&txn).await?;

    txn.commit().await?;
    info!(admin_id = admin_id, "removed admin");
    Ok(())
}
