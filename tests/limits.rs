mod common;

use chrono::Utc;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};

use common::{
    create_admin, create_user, fetch_user, master_node, new_user_input, report, setup_db,
};
use warden_server::credentials::UuidCredentialService;
use warden_server::db::entities::{user, user_usage_reset_log};
use warden_server::db::entities::user::NextPlan;
use warden_server::db::enums::UserStatus;
use warden_server::db::services::user_status_service::ADMIN_DATA_LIMIT_EXHAUSTED_REASON_KEY;
use warden_server::db::services::{
    admin_service, service_service, usage_service, user_service, ReportOutcome, ServiceError,
    UserModify,
};

const GIB: i64 = 1_073_741_824;

#[tokio::test]
async fn zero_data_limit_never_limits() {
    let db = setup_db().await;
    let node = master_node(&db).await;
    let user = create_user(&db, new_user_input("alice", None, 0)).await;

    usage_service::record_usage(&db, node.id, &[report("alice", 50 * GIB, Utc::now())])
        .await
        .unwrap();
    assert_eq!(fetch_user(&db, user.id).await.status, UserStatus::Active);
}

#[tokio::test]
async fn limit_flips_on_the_crossing_ingestion_not_before() {
    let db = setup_db().await;
    let node = master_node(&db).await;
    let user = create_user(&db, new_user_input("alice", None, GIB)).await;

    let now = Utc::now();
    usage_service::record_usage(&db, node.id, &[report("alice", 400_000_000, now)])
        .await
        .unwrap();
    assert_eq!(fetch_user(&db, user.id).await.status, UserStatus::Active);

    usage_service::record_usage(&db, node.id, &[report("alice", 400_000_000, now)])
        .await
        .unwrap();
    assert_eq!(fetch_user(&db, user.id).await.status, UserStatus::Active);

    // This report pushes the total to data_limit + 1.
    usage_service::record_usage(&db, node.id, &[report("alice", GIB - 800_000_000 + 1, now)])
        .await
        .unwrap();
    let refreshed = fetch_user(&db, user.id).await;
    assert_eq!(refreshed.status, UserStatus::Limited);
    assert_eq!(refreshed.used_traffic, GIB + 1);
}

#[tokio::test]
async fn unlimited_expiry_never_expires() {
    let db = setup_db().await;
    let node = master_node(&db).await;
    let user = create_user(&db, new_user_input("alice", None, 0)).await;

    usage_service::record_usage(&db, node.id, &[report("alice", 1, Utc::now())])
        .await
        .unwrap();
    assert_eq!(fetch_user(&db, user.id).await.status, UserStatus::Active);
}

#[tokio::test]
async fn past_expiry_flips_expired_on_ingestion() {
    let db = setup_db().await;
    let node = master_node(&db).await;
    let mut input = new_user_input("alice", None, 0);
    input.expire = Utc::now().timestamp() - 100;
    let user = create_user(&db, input).await;

    usage_service::record_usage(&db, node.id, &[report("alice", 1, Utc::now())])
        .await
        .unwrap();
    assert_eq!(fetch_user(&db, user.id).await.status, UserStatus::Expired);
}

#[tokio::test]
async fn simultaneous_breach_reports_limited_first() {
    let db = setup_db().await;
    let node = master_node(&db).await;
    let mut input = new_user_input("alice", None, 100);
    input.expire = Utc::now().timestamp() - 100;
    let user = create_user(&db, input).await;

    usage_service::record_usage(&db, node.id, &[report("alice", 200, Utc::now())])
        .await
        .unwrap();
    assert_eq!(fetch_user(&db, user.id).await.status, UserStatus::Limited);
}

#[tokio::test]
async fn users_limit_rejects_the_third_creation_without_a_row() {
    let db = setup_db().await;
    let admin = create_admin(&db, "tenant", 2, 0).await;

    create_user(&db, new_user_input("u1", Some(admin.id), 0)).await;
    create_user(&db, new_user_input("u2", Some(admin.id), 0)).await;

    let result = user_service::create_user(
        &db,
        &UuidCredentialService,
        new_user_input("u3", Some(admin.id), 0),
    )
    .await;
    assert!(matches!(
        result,
        Err(ServiceError::UsersLimitReached { limit: 2 })
    ));

    let rows = user::Entity::find()
        .filter(user::Column::AdminId.eq(admin.id))
        .count(&db)
        .await
        .unwrap();
    assert_eq!(rows, 2);
}

#[tokio::test]
async fn next_plan_carries_remaining_allowance() {
    let db = setup_db().await;
    let node = master_node(&db).await;
    let user = create_user(&db, new_user_input("alice", None, 5_000_000_000)).await;

    let now = Utc::now();
    usage_service::record_usage(&db, node.id, &[report("alice", 4_900_000_000, now)])
        .await
        .unwrap();

    user_service::apply_user_modify(
        &db,
        user.id,
        UserModify {
            next_plan: Some(Some(NextPlan {
                data_limit: 5_000_000_000,
                expire: 0,
                add_remaining_traffic: true,
                fire_on_either: true,
            })),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    usage_service::record_usage(&db, node.id, &[report("alice", 200_000_000, now)])
        .await
        .unwrap();

    let refreshed = fetch_user(&db, user.id).await;
    assert_eq!(refreshed.status, UserStatus::Active);
    assert_eq!(refreshed.used_traffic, 0);
    assert_eq!(refreshed.data_limit, 5_000_000_000 + 100_000_000);
    assert_eq!(refreshed.next_plan, None);
    assert_eq!(refreshed.lifetime_used_traffic, 5_100_000_000);

    let resets = user_usage_reset_log::Entity::find()
        .filter(user_usage_reset_log::Column::UserId.eq(user.id))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(resets.len(), 1);
    assert_eq!(resets[0].used_traffic_at_reset, 5_100_000_000);
}

#[tokio::test]
async fn next_plan_requiring_both_breaches_stays_armed() {
    let db = setup_db().await;
    let node = master_node(&db).await;
    let mut input = new_user_input("alice", None, 1_000);
    input.next_plan = Some(NextPlan {
        data_limit: 2_000,
        expire: 0,
        add_remaining_traffic: false,
        fire_on_either: false,
    });
    let user = create_user(&db, input).await;

    usage_service::record_usage(&db, node.id, &[report("alice", 1_500, Utc::now())])
        .await
        .unwrap();

    let refreshed = fetch_user(&db, user.id).await;
    assert_eq!(refreshed.status, UserStatus::Limited);
    assert!(refreshed.next_plan.is_some());
}

#[tokio::test]
async fn raising_the_limit_reactivates_a_limited_user() {
    let db = setup_db().await;
    let node = master_node(&db).await;
    let user = create_user(&db, new_user_input("alice", None, 100)).await;

    usage_service::record_usage(&db, node.id, &[report("alice", 150, Utc::now())])
        .await
        .unwrap();
    assert_eq!(fetch_user(&db, user.id).await.status, UserStatus::Limited);

    user_service::apply_user_modify(
        &db,
        user.id,
        UserModify {
            data_limit: Some(1_000),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(fetch_user(&db, user.id).await.status, UserStatus::Active);
}

#[tokio::test]
async fn exhausted_admin_aggregate_disables_the_admin() {
    let db = setup_db().await;
    let node = master_node(&db).await;
    let admin = create_admin(&db, "tenant", 0, 500).await;
    create_user(&db, new_user_input("alice", Some(admin.id), 0)).await;

    usage_service::record_usage(&db, node.id, &[report("alice", 600, Utc::now())])
        .await
        .unwrap();

    let refreshed = admin_service::get_admin_by_id(&db, admin.id)
        .await
        .unwrap()
        .unwrap();
    assert!(refreshed.is_disabled);
    assert_eq!(
        refreshed.disabled_reason.as_deref(),
        Some(ADMIN_DATA_LIMIT_EXHAUSTED_REASON_KEY)
    );

    // Once the cap is consumed, no new allowance can be granted.
    let result = user_service::create_user(
        &db,
        &UuidCredentialService,
        new_user_input("bob", Some(admin.id), 0),
    )
    .await;
    assert!(matches!(result, Err(ServiceError::AdminDataLimitExceeded)));
}

#[tokio::test]
async fn service_allowlist_gates_non_sudo_admins() {
    let db = setup_db().await;
    let admin = create_admin(&db, "tenant", 0, 0).await;
    let service = service_service::create_service(&db, "premium").await.unwrap();

    let mut input = new_user_input("alice", Some(admin.id), 0);
    input.service_id = Some(service.id);
    let denied = user_service::create_user(&db, &UuidCredentialService, input.clone()).await;
    assert!(matches!(denied, Err(ServiceError::Validation(_))));

    service_service::allow_admin(&db, service.id, admin.id)
        .await
        .unwrap();
    let allowed = user_service::create_user(&db, &UuidCredentialService, input).await;
    assert!(allowed.is_ok());
}

#[tokio::test]
async fn on_hold_user_arms_relative_expiry_on_first_connect() {
    let db = setup_db().await;
    let mut input = new_user_input("alice", None, 0);
    input.status = UserStatus::OnHold;
    input.on_hold_expire_duration = 3_600;
    let user = create_user(&db, input).await;

    let before = Utc::now().timestamp();
    let started = user_service::start_on_hold_user(&db, user.id).await.unwrap();
    assert_eq!(started.status, UserStatus::Active);
    assert!(started.expire >= before + 3_600);
    assert!(started.online_at.is_some());
}

#[tokio::test]
async fn disabled_status_is_terminal_until_reactivated() {
    let db = setup_db().await;
    let node = master_node(&db).await;
    let user = create_user(&db, new_user_input("alice", None, 100)).await;

    user_service::apply_user_modify(
        &db,
        user.id,
        UserModify {
            status: Some(UserStatus::Disabled),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    // Usage still accrues to the counters, but the status stays put.
    usage_service::record_usage(&db, node.id, &[report("alice", 500, Utc::now())])
        .await
        .unwrap();
    let refreshed = fetch_user(&db, user.id).await;
    assert_eq!(refreshed.status, UserStatus::Disabled);

    let reactivated = user_service::apply_user_modify(
        &db,
        user.id,
        UserModify {
            status: Some(UserStatus::Active),
            data_limit: Some(1_000),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(reactivated.status, UserStatus::Active);
}

#[tokio::test]
async fn batch_outcomes_are_reported_per_row() {
    let db = setup_db().await;
    let node = master_node(&db).await;
    create_user(&db, new_user_input("alice", None, 0)).await;

    let now = Utc::now();
    let outcomes = usage_service::record_usage(
        &db,
        node.id,
        &[
            report("alice", 10, now),
            report("ghost", 10, now),
            report("alice", -1, now),
            report("alice", 20, now),
        ],
    )
    .await
    .unwrap();
    assert_eq!(
        outcomes,
        vec![
            ReportOutcome::Accepted,
            ReportOutcome::UnknownUser,
            ReportOutcome::NegativeDelta,
            ReportOutcome::Accepted,
        ]
    );
}
