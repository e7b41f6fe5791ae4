//! Store tests against a live Postgres. Run with `cargo test -- --ignored`
//! once the database from `configuration.yaml` is reachable.

use chrono::{Duration, Utc};
use session_authority::configuration::{get_configuration, DatabaseSettings};
use session_authority::error::StoreError;
use session_authority::store::{NewUser, PgStore, RefreshSession, Role, SessionStore, User, UserStore};
use sqlx::{Connection, Executor, PgConnection, PgPool};
use uuid::Uuid;

async fn spawn_store() -> PgStore {
    let mut configuration = get_configuration().expect("Failed to read configuration.");
    configuration.database.database_name = Uuid::new_v4().to_string();
    PgStore::new(configure_database(&configuration.database).await)
}

pub async fn configure_database(config: &DatabaseSettings) -> PgPool {
    // Create database
    let mut connection = PgConnection::connect(&config.connection_string_without_db())
        .await
        .expect("Failed to connect to Postgres");
    connection
        .execute(&*format!(r#"CREATE DATABASE "{}";"#, config.database_name))
        .await
        .expect("Failed to create database.");
    // Migrate database
    let connection_pool = PgPool::connect(&config.connection_string())
        .await
        .expect("Failed to connect to Postgres.");
    sqlx::migrate!("./migrations")
        .run(&connection_pool)
        .await
        .expect("Failed to migrate the database.");
    connection_pool
}

async fn create_user(store: &PgStore, email: &str) -> User {
    store
        .create_user(NewUser {
            email: email.to_string(),
            name: Some("Test".to_string()),
            password_hash: "pbkdf2-sha512$1000$00$00".to_string(),
            role: Role::User,
        })
        .await
        .expect("Failed to create user")
}

fn session(id: &str, user_id: &str) -> RefreshSession {
    let now = Utc::now();
    RefreshSession {
        id: id.to_string(),
        user_id: user_id.to_string(),
        issued_at: now,
        expires_at: now + Duration::days(7),
        revoked_at: None,
        replaced_by: None,
        user_agent: Some("integration-test/1.0".to_string()),
        client_address: None,
    }
}

#[tokio::test]
#[ignore]
async fn users_round_trip_and_reject_duplicate_email() {
    let store = spawn_store().await;
    let user = create_user(&store, "a@x.com").await;

    let by_email = store.find_user_by_email("a@x.com").await.unwrap();
    let by_id = store.find_user_by_id(&user.id).await.unwrap();
    assert_eq!(by_email.as_ref().map(|u| &u.id), Some(&user.id));
    assert_eq!(by_id.map(|u| u.email), Some("a@x.com".to_string()));

    let err = store
        .create_user(NewUser {
            email: "a@x.com".to_string(),
            name: None,
            password_hash: "x".to_string(),
            role: Role::User,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::UniqueViolation(_)));
}

#[tokio::test]
#[ignore]
async fn duplicate_session_id_is_unique_violation() {
    let store = spawn_store().await;
    let user = create_user(&store, "a@x.com").await;

    store.insert_session(&session("s1", &user.id)).await.unwrap();
    let err = store
        .insert_session(&session("s1", &user.id))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::UniqueViolation(_)));
}

#[tokio::test]
#[ignore]
async fn rotate_links_successor_once() {
    let store = spawn_store().await;
    let user = create_user(&store, "a@x.com").await;
    store.insert_session(&session("s1", &user.id)).await.unwrap();

    store
        .rotate_session("s1", Utc::now(), &session("s2", &user.id))
        .await
        .unwrap();

    let old = store.find_session("s1").await.unwrap().unwrap();
    assert!(old.is_revoked());
    assert_eq!(old.replaced_by.as_deref(), Some("s2"));
    assert!(store.find_session("s2").await.unwrap().is_some());

    let err = store
        .rotate_session("s1", Utc::now(), &session("s3", &user.id))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyRevoked(_)));
    assert!(store.find_session("s3").await.unwrap().is_none());

    let err = store
        .rotate_session("missing", Utc::now(), &session("s4", &user.id))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
#[ignore]
async fn failed_rotation_leaves_old_session_active() {
    let store = spawn_store().await;
    let user = create_user(&store, "a@x.com").await;
    store.insert_session(&session("s1", &user.id)).await.unwrap();
    store.insert_session(&session("taken", &user.id)).await.unwrap();

    let err = store
        .rotate_session("s1", Utc::now(), &session("taken", &user.id))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::UniqueViolation(_)));

    let old = store.find_session("s1").await.unwrap().unwrap();
    assert!(!old.is_revoked());
    assert!(old.replaced_by.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn concurrent_rotations_succeed_exactly_once() {
    let store = spawn_store().await;
    let user = create_user(&store, "a@x.com").await;
    store.insert_session(&session("s1", &user.id)).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        let next = session(&format!("next-{}", i), &user.id);
        handles.push(tokio::spawn(async move {
            store.rotate_session("s1", Utc::now(), &next).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        match handle.await.expect("Rotation task panicked") {
            Ok(()) => successes += 1,
            Err(e) => assert!(matches!(e, StoreError::AlreadyRevoked(_)), "got {:?}", e),
        }
    }
    assert_eq!(successes, 1);
}

#[tokio::test]
#[ignore]
async fn revoke_is_idempotent() {
    let store = spawn_store().await;
    let user = create_user(&store, "a@x.com").await;
    store.insert_session(&session("s1", &user.id)).await.unwrap();

    assert!(store.revoke_session("s1", Utc::now()).await.unwrap());
    assert!(!store.revoke_session("s1", Utc::now()).await.unwrap());
    assert!(!store.revoke_session("missing", Utc::now()).await.unwrap());
}
