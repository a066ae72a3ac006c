mod common;

use common::{create_admin, create_user, fetch_user, new_user_input, setup_db};
use warden_server::credentials::UuidCredentialService;
use warden_server::db::enums::UserStatus;
use warden_server::db::services::{
    admin_service, service_service, user_service, AdminRemovalDisposition, NewProxyHost,
    ServiceError, ServiceRemovalDisposition,
};

#[tokio::test]
async fn service_hosts_can_be_managed() {
    let db = setup_db().await;
    let service = service_service::create_service(&db, "premium").await.unwrap();

    service_service::add_host(
        &db,
        service.id,
        NewProxyHost {
            remark: "edge-1".to_string(),
            address: "edge1.example.net".to_string(),
            port: 443,
            sni: Some("cdn.example.net".to_string()),
            host: None,
        },
    )
    .await
    .unwrap();

    let hosts = service_service::list_hosts(&db, service.id).await.unwrap();
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].address, "edge1.example.net");
}

#[tokio::test]
async fn removing_a_service_can_delete_its_users() {
    let db = setup_db().await;
    let service = service_service::create_service(&db, "premium").await.unwrap();
    let mut input = new_user_input("alice", None, 0);
    input.service_id = Some(service.id);
    let user = create_user(&db, input).await;

    service_service::remove_service(&db, service.id, ServiceRemovalDisposition::DeleteUsers)
        .await
        .unwrap();

    let refreshed = fetch_user(&db, user.id).await;
    assert_eq!(refreshed.status, UserStatus::Deleted);
    assert_eq!(refreshed.service_id, None);
    assert!(service_service::get_service_by_id(&db, service.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn removing_a_service_can_transfer_its_users() {
    let db = setup_db().await;
    let old = service_service::create_service(&db, "basic").await.unwrap();
    let new = service_service::create_service(&db, "premium").await.unwrap();
    let mut input = new_user_input("alice", None, 0);
    input.service_id = Some(old.id);
    let user = create_user(&db, input).await;

    service_service::remove_service(
        &db,
        old.id,
        ServiceRemovalDisposition::TransferUsersTo { service_id: new.id },
    )
    .await
    .unwrap();

    let refreshed = fetch_user(&db, user.id).await;
    assert_eq!(refreshed.status, UserStatus::Active);
    assert_eq!(refreshed.service_id, Some(new.id));
}

#[tokio::test]
async fn removing_an_admin_reassigns_its_users() {
    let db = setup_db().await;
    let leaving = create_admin(&db, "leaving", 0, 0).await;
    let receiving = create_admin(&db, "receiving", 0, 0).await;
    let user = create_user(&db, new_user_input("alice", Some(leaving.id), 0)).await;

    admin_service::remove_admin(
        &db,
        leaving.id,
        AdminRemovalDisposition::ReassignUsers {
            to_admin_id: receiving.id,
        },
    )
    .await
    .unwrap();

    let refreshed = fetch_user(&db, user.id).await;
    assert_eq!(refreshed.admin_id, Some(receiving.id));
    assert!(admin_service::get_admin_by_id(&db, leaving.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn removing_an_admin_can_cascade_soft_deletes() {
    let db = setup_db().await;
    let leaving = create_admin(&db, "leaving", 0, 0).await;
    let user = create_user(&db, new_user_input("alice", Some(leaving.id), 0)).await;

    admin_service::remove_admin(&db, leaving.id, AdminRemovalDisposition::CascadeUsers)
        .await
        .unwrap();

    let refreshed = fetch_user(&db, user.id).await;
    assert_eq!(refreshed.status, UserStatus::Deleted);
}

#[tokio::test]
async fn the_master_admin_cannot_be_removed() {
    let db = setup_db().await;
    let master = admin_service::get_master_admin(&db).await.unwrap();
    let result =
        admin_service::remove_admin(&db, master.id, AdminRemovalDisposition::CascadeUsers).await;
    assert!(matches!(result, Err(ServiceError::Validation(_))));
}

#[tokio::test]
async fn credential_rotation_regenerates_proxy_settings() {
    let db = setup_db().await;
    let user = create_user(&db, new_user_input("alice", None, 0)).await;
    let proxy = user_service::add_user_proxy(&db, user.id, "vmess").await.unwrap();
    assert_eq!(
        proxy.settings["credential_key"],
        serde_json::json!(user.credential_key)
    );

    let rotated = user_service::revoke_user_credential(&db, &UuidCredentialService, user.id)
        .await
        .unwrap();
    assert_ne!(rotated.credential_key, user.credential_key);

    use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
    use warden_server::db::entities::proxy as proxy_entity;
    let proxies = proxy_entity::Entity::find()
        .filter(proxy_entity::Column::UserId.eq(user.id))
        .all(&db)
        .await
        .unwrap();
    assert_eq!(proxies.len(), 1);
    assert_eq!(
        proxies[0].settings["credential_key"],
        serde_json::json!(rotated.credential_key)
    );
}
