//! User lifecycle: creation under admin admission gates, validated
//! modifications, manual resets, credential rotation, and soft deletion.
//! Writes to the user row go through the same row-version check as usage
//! ingestion, so admin edits and node reports never overwrite each other.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set, TransactionTrait,
};
use serde_json::json;
use tracing::info;

use crate::credentials::CredentialService;
use crate::db::entities::user::{self, NextPlan};
use crate::db::entities::{proxy, user_usage_reset_log};
use crate::db::enums::{DataLimitResetStrategy, UserStatus};
use crate::db::services::usage_service::MAX_CONFLICT_RETRIES;
use crate::db::services::{admin_service, service_service, user_status_service, ServiceError};

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub admin_id: Option<i32>,
    /// Initial status; only `active` and `on_hold` are accepted.
    pub status: UserStatus,
    pub data_limit: i64,
    pub data_limit_reset_strategy: DataLimitResetStrategy,
    pub expire: i64,
    pub service_id: Option<i32>,
    pub next_plan: Option<NextPlan>,
    pub on_hold_expire_duration: i64,
    pub on_hold_timeout: Option<chrono::DateTime<chrono::Utc>>,
    pub auto_delete_in_days: Option<i64>,
    pub note: Option<String>,
}

/// Validated user modification; `None` fields are left unchanged.
/// `next_plan` is tri-state: `Some(None)` clears the pending plan.
#[derive(Debug, Clone, Default)]
pub struct UserModify {
    pub status: Option<UserStatus>,
    pub data_limit: Option<i64>,
    pub data_limit_reset_strategy: Option<DataLimitResetStrategy>,
    pub expire: Option<i64>,
    pub service_id: Option<i32>,
    pub next_plan: Option<Option<NextPlan>>,
    pub note: Option<String>,
}

pub async fn get_user_by_id(
    db: &DatabaseConnection,
    user_id: i32,
) -> Result<Option<user::Model>, ServiceError> {
    Ok(user::Entity::find_by_id(user_id).one(db).await?)
}

/// Looks a user up by name, excluding soft-deleted rows.
pub async fn get_active_user_by_username(
    db: &DatabaseConnection,
    username: &str,
) -> Result<Option<user::Model>, ServiceError> {
    Ok(user::Entity::find()
        .filter(user::Column::Username.eq(username))
        .filter(user::Column::Status.ne(UserStatus::Deleted))
        .one(db)
        .await?)
}

/// Users owned by the admin, excluding soft-deleted rows.
pub async fn list_users_for_admin(
    db: &DatabaseConnection,
    admin_id: i32,
) -> Result<Vec<user::Model>, ServiceError> {
    Ok(user::Entity::find()
        .filter(user::Column::AdminId.eq(admin_id))
        .filter(user::Column::Status.ne(UserStatus::Deleted))
        .order_by_asc(user::Column::Id)
        .all(db)
        .await?)
}

/// Creates a user under the owning admin's admission gates. Key material
/// comes from the credential collaborator; the core stores it opaquely.
pub async fn create_user(
    db: &DatabaseConnection,
    credentials: &dyn CredentialService,
    input: NewUser,
) -> Result<user::Model, ServiceError> {
    if !matches!(input.status, UserStatus::Active | UserStatus::OnHold) {
        return Err(ServiceError::Validation(format!(
            "users cannot be created in status {}",
            input.status
        )));
    }
    if get_active_user_by_username(db, &input.username)
        .await?
        .is_some()
    {
        return Err(ServiceError::Validation(format!(
            "username {} already exists",
            input.username
        )));
    }

    if let Some(admin_id) = input.admin_id {
        let admin = admin_service::get_admin_by_id(db, admin_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("admin {admin_id}")))?;
        admin_service::assert_can_add_user(db, &admin).await?;
        if let Some(service_id) = input.service_id {
            service_service::assert_admin_allowed(db, service_id, &admin).await?;
        }
    } else if let Some(service_id) = input.service_id {
        service_service::get_service_by_id(db, service_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("service {service_id}")))?;
    }

    let credential_key = credentials.issue_credential(&input.username).await?;
    let now = Utc::now();
    let created = user::ActiveModel {
        username: Set(input.username),
        admin_id: Set(input.admin_id),
        status: Set(input.status),
        used_traffic: Set(0),
        lifetime_used_traffic: Set(0),
        data_limit: Set(input.data_limit),
        data_limit_reset_strategy: Set(input.data_limit_reset_strategy),
        expire: Set(input.expire),
        credential_key: Set(credential_key),
        service_id: Set(input.service_id),
        next_plan: Set(input.next_plan),
        on_hold_expire_duration: Set(input.on_hold_expire_duration),
        on_hold_timeout: Set(input.on_hold_timeout),
        auto_delete_in_days: Set(input.auto_delete_in_days),
        online_at: Set(None),
        note: Set(input.note),
        version: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await?;
    info!(user_id = created.id, username = %created.username, "created user");
    Ok(created)
}

/// Applies a validated modification, re-evaluating the user's status under
/// the new limits (raising a limit brings a `limited` user back to
/// `active` in the same operation).
pub async fn apply_user_modify(
    db: &DatabaseConnection,
    user_id: i32,
    modify: UserModify,
) -> Result<user::Model, ServiceError> {
    if let Some(status) = &modify.status {
        if !matches!(status, UserStatus::Active | UserStatus::Disabled) {
            return Err(ServiceError::Validation(format!(
                "status {status} cannot be set directly"
            )));
        }
    }

    for _attempt in 0..MAX_CONFLICT_RETRIES {
        let current = get_user_by_id(db, user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {user_id}")))?;
        if current.status == UserStatus::Deleted {
            return Err(ServiceError::NotFound(format!("user {user_id}")));
        }

        let data_limit = modify.data_limit.unwrap_or(current.data_limit);
        let expire = modify.expire.unwrap_or(current.expire);
        let service_id = modify.service_id.or(current.service_id);

        let raises_limit = data_limit > current.data_limit
            || (current.data_limit > 0 && data_limit == 0)
            || (current.expire > 0 && (expire == 0 || expire > current.expire));
        if raises_limit {
            if let Some(admin_id) = current.admin_id {
                let admin = admin_service::get_admin_by_id(db, admin_id)
                    .await?
                    .ok_or_else(|| ServiceError::NotFound(format!("admin {admin_id}")))?;
                admin_service::assert_can_grant_allowance(db, &admin).await?;
            }
        }
        if let (Some(new_service), Some(admin_id)) = (modify.service_id, current.admin_id) {
            let admin = admin_service::get_admin_by_id(db, admin_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("admin {admin_id}")))?;
            service_service::assert_admin_allowed(db, new_service, &admin).await?;
        }

        let now = Utc::now();
        let status = match &modify.status {
            Some(UserStatus::Disabled) => UserStatus::Disabled,
            Some(UserStatus::Active) | None => {
                let base = if matches!(modify.status, Some(UserStatus::Active)) {
                    UserStatus::Active
                } else {
                    current.status.clone()
                };
                user_status_service::refresh_status(
                    &base,
                    current.used_traffic,
                    data_limit,
                    expire,
                    current.on_hold_timeout,
                    now,
                )
                .0
            }
            Some(other) => {
                return Err(ServiceError::Validation(format!(
                    "status {other} cannot be set directly"
                )))
            }
        };

        let update = user::ActiveModel {
            id: Set(current.id),
            status: Set(status),
            data_limit: Set(data_limit),
            data_limit_reset_strategy: Set(modify
                .data_limit_reset_strategy
                .clone()
                .unwrap_or(current.data_limit_reset_strategy.clone())),
            expire: Set(expire),
            service_id: Set(service_id),
            next_plan: Set(match &modify.next_plan {
                Some(plan) => plan.clone(),
                None => current.next_plan.clone(),
            }),
            note: Set(modify.note.clone().or(current.note.clone())),
            version: Set(current.version + 1),
            updated_at: Set(now),
            ..Default::default()
        };
        match user::Entity::update(update)
            .filter(user::Column::Version.eq(current.version))
            .exec(db)
            .await
        {
            Ok(updated) => return Ok(updated),
            Err(DbErr::RecordNotUpdated) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(ServiceError::Conflict {
        user_id,
        retries: MAX_CONFLICT_RETRIES,
    })
}

/// Zeroes the user's counter, recording the reset so historical series stay
/// correct, and re-activates a user that was limited purely by data usage.
/// The owning admin must still have aggregate allowance to grant.
pub async fn reset_user_data_usage(
    db: &DatabaseConnection,
    user_id: i32,
) -> Result<user::Model, ServiceError> {
    for _attempt in 0..MAX_CONFLICT_RETRIES {
        let current = get_user_by_id(db, user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {user_id}")))?;
        if current.status == UserStatus::Deleted {
            return Err(ServiceError::NotFound(format!("user {user_id}")));
        }
        if let Some(admin_id) = current.admin_id {
            let admin = admin_service::get_admin_by_id(db, admin_id)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("admin {admin_id}")))?;
            admin_service::assert_can_grant_allowance(db, &admin).await?;
        }

        let now = Utc::now();
        let (status, _) = user_status_service::refresh_status(
            &current.status,
            0,
            current.data_limit,
            current.expire,
            current.on_hold_timeout,
            now,
        );

        let txn = db.begin().await?;
        let update = user::ActiveModel {
            id: Set(current.id),
            status: Set(status),
            used_traffic: Set(0),
            version: Set(current.version + 1),
            updated_at: Set(now),
            ..Default::default()
        };
        match user::Entity::update(update)
            .filter(user::Column::Version.eq(current.version))
            .exec(&txn)
            .await
        {
            Ok(updated) => {
                user_usage_reset_log::ActiveModel {
                    user_id: Set(current.id),
                    used_traffic_at_reset: Set(current.used_traffic),
                    reset_at: Set(now),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;
                txn.commit().await?;
                info!(user_id = current.id, "reset user data usage");
                return Ok(updated);
            }
            Err(DbErr::RecordNotUpdated) => {
                txn.rollback().await?;
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(ServiceError::Conflict {
        user_id,
        retries: MAX_CONFLICT_RETRIES,
    })
}

/// Soft delete: the row is kept for usage-log integrity and excluded from
/// active queries; the retention sweep purges it later.
pub async fn remove_user(
    db: &DatabaseConnection,
    user_id: i32,
) -> Result<user::Model, ServiceError> {
    for _attempt in 0..MAX_CONFLICT_RETRIES {
        let current = get_user_by_id(db, user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {user_id}")))?;
        if current.status == UserStatus::Deleted {
            return Ok(current);
        }
        let update = user::ActiveModel {
            id: Set(current.id),
            status: Set(UserStatus::Deleted),
            version: Set(current.version + 1),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        match user::Entity::update(update)
            .filter(user::Column::Version.eq(current.version))
            .exec(db)
            .await
        {
            Ok(updated) => {
                info!(user_id = current.id, "soft-deleted user");
                return Ok(updated);
            }
            Err(DbErr::RecordNotUpdated) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(ServiceError::Conflict {
        user_id,
        retries: MAX_CONFLICT_RETRIES,
    })
}

/// First-connect activation for an on-hold user: arms the relative expiry
/// and brings the user active. Called by the proxy layer when the user's
/// credentials are first exercised.
pub async fn start_on_hold_user(
    db: &DatabaseConnection,
    user_id: i32,
) -> Result<user::Model, ServiceError> {
    for _attempt in 0..MAX_CONFLICT_RETRIES {
        let current = get_user_by_id(db, user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {user_id}")))?;
        if current.status != UserStatus::OnHold {
            return Err(ServiceError::Validation(format!(
                "user {user_id} is not on hold"
            )));
        }
        let now = Utc::now();
        let expire = if current.on_hold_expire_duration > 0 {
            now.timestamp() + current.on_hold_expire_duration
        } else {
            0
        };
        let update = user::ActiveModel {
            id: Set(current.id),
            status: Set(UserStatus::Active),
            expire: Set(expire),
            on_hold_timeout: Set(None),
            online_at: Set(Some(now)),
            version: Set(current.version + 1),
            updated_at: Set(now),
            ..Default::default()
        };
        match user::Entity::update(update)
            .filter(user::Column::Version.eq(current.version))
            .exec(db)
            .await
        {
            Ok(updated) => {
                info!(user_id = current.id, expire = expire, "on-hold user started");
                return Ok(updated);
            }
            Err(DbErr::RecordNotUpdated) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(ServiceError::Conflict {
        user_id,
        retries: MAX_CONFLICT_RETRIES,
    })
}

/// Revokes the user's proxy flow: fresh key material from the credential
/// collaborator, and every proxy row regenerated from it in the same
/// transaction.
pub async fn revoke_user_credential(
    db: &DatabaseConnection,
    credentials: &dyn CredentialService,
    user_id: i32,
) -> Result<user::Model, ServiceError> {
    for _attempt in 0..MAX_CONFLICT_RETRIES {
        let current = get_user_by_id(db, user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {user_id}")))?;
        if current.status == UserStatus::Deleted {
            return Err(ServiceError::NotFound(format!("user {user_id}")));
        }
        let new_key = credentials.rotate_credential(&current).await?;
        let now = Utc::now();

        let txn = db.begin().await?;
        let update = user::ActiveModel {
            id: Set(current.id),
            credential_key: Set(new_key.clone()),
            version: Set(current.version + 1),
            updated_at: Set(now),
            ..Default::default()
        };
        match user::Entity::update(update)
            .filter(user::Column::Version.eq(current.version))
            .exec(&txn)
            .await
        {
            Ok(updated) => {
                proxy::Entity::update_many()
                    .col_expr(
                        proxy::Column::Settings,
                        Expr::value(json!({ "credential_key": new_key })),
                    )
                    .filter(proxy::Column::UserId.eq(current.id))
                    .exec(&txn)
                    .await?;
                txn.commit().await?;
                info!(user_id = current.id, "rotated user credential");
                return Ok(updated);
            }
            Err(DbErr::RecordNotUpdated) => {
                txn.rollback().await?;
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(ServiceError::Conflict {
        user_id,
        retries: MAX_CONFLICT_RETRIES,
    })
}

/// Adds a protocol entry for the user, seeded from the current credential.
pub async fn add_user_proxy(
    db: &DatabaseConnection,
    user_id: i32,
    proxy_type: &str,
) -> Result<proxy::Model, ServiceError> {
    let user = get_user_by_id(db, user_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("user {user_id}")))?;
    let created = proxy::ActiveModel {
        user_id: Set(user.id),
        proxy_type: Set(proxy_type.to_string()),
        settings: Set(json!({ "credential_key": user.credential_key })),
        created_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(created)
}
