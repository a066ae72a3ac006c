mod common;

use chrono::{Duration, Utc};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use common::{create_user, fetch_user, master_admin, master_node, new_user_input, report, setup_db};
use warden_server::db::entities::node_user_usage;
use warden_server::db::services::{
    admin_service, node_service, usage_service, ReportOutcome, ServiceError,
};

#[tokio::test]
async fn accepted_report_updates_counters_and_ledger() {
    let db = setup_db().await;
    let node = master_node(&db).await;
    let user = create_user(&db, new_user_input("alice", None, 0)).await;

    let now = Utc::now();
    let outcomes = usage_service::record_usage(&db, node.id, &[report("alice", 1_000, now)])
        .await
        .unwrap();
    assert_eq!(outcomes, vec![ReportOutcome::Accepted]);

    let refreshed = fetch_user(&db, user.id).await;
    assert_eq!(refreshed.used_traffic, 1_000);
    assert_eq!(refreshed.lifetime_used_traffic, 1_000);
    assert!(refreshed.online_at.is_some());
    assert_eq!(refreshed.version, user.version + 1);

    let ledger = node_user_usage::Entity::find()
        .filter(node_user_usage::Column::UserId.eq(user.id))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].used_traffic, 1_000);
    assert_eq!(ledger[0].node_id, node.id);

    let refreshed_node = node_service::get_node_by_id(&db, node.id)
        .await
        .unwrap()
        .unwrap();
    assert!(refreshed_node.last_report_at.is_some());
}

#[tokio::test]
async fn negative_delta_is_rejected_per_row() {
    let db = setup_db().await;
    let node = master_node(&db).await;
    let user = create_user(&db, new_user_input("alice", None, 0)).await;

    let now = Utc::now();
    let outcomes = usage_service::record_usage(
        &db,
        node.id,
        &[report("alice", -5, now), report("alice", 100, now)],
    )
    .await
    .unwrap();
    assert_eq!(
        outcomes,
        vec![ReportOutcome::NegativeDelta, ReportOutcome::Accepted]
    );

    let refreshed = fetch_user(&db, user.id).await;
    assert_eq!(refreshed.used_traffic, 100);
}

#[tokio::test]
async fn unknown_user_is_skipped_without_failing_the_batch() {
    let db = setup_db().await;
    let node = master_node(&db).await;
    let user = create_user(&db, new_user_input("alice", None, 0)).await;

    let now = Utc::now();
    let outcomes = usage_service::record_usage(
        &db,
        node.id,
        &[report("ghost", 10, now), report("alice", 10, now)],
    )
    .await
    .unwrap();
    assert_eq!(
        outcomes,
        vec![ReportOutcome::UnknownUser, ReportOutcome::Accepted]
    );
    assert_eq!(fetch_user(&db, user.id).await.used_traffic, 10);
}

#[tokio::test]
async fn unknown_node_rejects_the_whole_batch() {
    let db = setup_db().await;
    create_user(&db, new_user_input("alice", None, 0)).await;

    let result = usage_service::record_usage(&db, 9_999, &[report("alice", 10, Utc::now())]).await;
    assert!(matches!(result, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn reports_within_one_hour_share_a_ledger_bucket() {
    let db = setup_db().await;
    let node = master_node(&db).await;
    let user = create_user(&db, new_user_input("alice", None, 0)).await;

    let base = usage_service::hour_bucket(Utc::now());
    let in_same_hour = base + Duration::minutes(10);
    let next_hour = base + Duration::hours(1) + Duration::minutes(5);

    usage_service::record_usage(
        &db,
        node.id,
        &[
            report("alice", 100, base),
            report("alice", 200, in_same_hour),
            report("alice", 50, next_hour),
        ],
    )
    .await
    .unwrap();

    let ledger = node_user_usage::Entity::find()
        .filter(node_user_usage::Column::UserId.eq(user.id))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(ledger.len(), 2);
    let total: i64 = ledger.iter().map(|row| row.used_traffic).sum();
    assert_eq!(total, 350);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reports_never_lose_updates() {
    let db = setup_db().await;
    let node = master_node(&db).await;
    let user = create_user(&db, new_user_input("alice", None, 0)).await;

    let tasks = 8;
    let reports_per_task = 5;
    let delta = 100;

    let mut handles = Vec::new();
    for _ in 0..tasks {
        let db = db.clone();
        let node_id = node.id;
        handles.push(tokio::spawn(async move {
            for _ in 0..reports_per_task {
                let outcomes =
                    usage_service::record_usage(&db, node_id, &[report("alice", delta, Utc::now())])
                        .await
                        .unwrap();
                assert_eq!(outcomes, vec![ReportOutcome::Accepted]);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let refreshed = fetch_user(&db, user.id).await;
    assert_eq!(
        refreshed.used_traffic,
        tasks as i64 * reports_per_task as i64 * delta
    );
    assert_eq!(refreshed.lifetime_used_traffic, refreshed.used_traffic);
}

#[tokio::test]
async fn unowned_user_usage_is_charged_to_the_master_admin() {
    let db = setup_db().await;
    let node = master_node(&db).await;
    let admin = master_admin(&db).await;
    create_user(&db, new_user_input("alice", None, 0)).await;

    usage_service::record_usage(&db, node.id, &[report("alice", 777, Utc::now())])
        .await
        .unwrap();

    let consumed = admin_service::consumed_traffic(&db, admin.id).await.unwrap();
    assert_eq!(consumed, 777);
}

#[tokio::test]
async fn soft_deleted_user_reports_are_skipped() {
    let db = setup_db().await;
    let node = master_node(&db).await;
    let user = create_user(&db, new_user_input("alice", None, 0)).await;
    warden_server::db::services::user_service::remove_user(&db, user.id)
        .await
        .unwrap();

    let outcomes = usage_service::record_usage(&db, node.id, &[report("alice", 10, Utc::now())])
        .await
        .unwrap();
    assert_eq!(outcomes, vec![ReportOutcome::UnknownUser]);
}
