#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use session_authority::auth::{ClientContext, SessionAuthority};
use session_authority::configuration::AuthSettings;
use session_authority::error::StoreError;
use session_authority::store::{MemoryStore, RefreshSession, SessionStore};
use session_authority::telemetry::{get_subscriber, init_subscriber};

// Logs are discarded unless TEST_LOG is set.
lazy_static! {
    static ref TRACING: () = {
        if std::env::var("TEST_LOG").is_ok() {
            let _ = init_subscriber(get_subscriber("debug", std::io::stdout));
        } else {
            let _ = init_subscriber(get_subscriber("debug", std::io::sink));
        }
    };
}

/// Low iteration count keeps hashing fast in debug builds.
pub const TEST_HASH_ITERATIONS: u32 = 1_000;

pub struct TestApp {
    pub authority: SessionAuthority<MemoryStore, MemoryStore>,
    pub store: Arc<MemoryStore>,
    pub settings: AuthSettings,
}

pub fn test_settings() -> AuthSettings {
    AuthSettings::new(
        "integration-access-secret-at-least-32-bytes",
        "integration-refresh-secret-at-least-32-bytes",
    )
    .with_hash_iterations(TEST_HASH_ITERATIONS)
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(test_settings())
}

pub fn spawn_app_with(settings: AuthSettings) -> TestApp {
    lazy_static::initialize(&TRACING);

    let store = Arc::new(MemoryStore::new());
    let authority = SessionAuthority::new(&settings, store.clone(), store.clone())
        .expect("Failed to build session authority");

    TestApp {
        authority,
        store,
        settings,
    }
}

pub fn client() -> ClientContext {
    ClientContext {
        user_agent: Some("integration-test/1.0".to_string()),
        client_address: Some("127.0.0.1".to_string()),
        request_id: Some(uuid::Uuid::new_v4().to_string()),
    }
}

/// Session store whose writes can be switched to fail, as a lost database would.
#[derive(Default)]
pub struct UnreliableSessionStore {
    pub inner: MemoryStore,
    fail_writes: AtomicBool,
}

impl UnreliableSessionStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for UnreliableSessionStore {
    async fn insert_session(&self, session: &RefreshSession) -> Result<(), StoreError> {
        self.check()?;
        self.inner.insert_session(session).await
    }

    async fn find_session(&self, id: &str) -> Result<Option<RefreshSession>, StoreError> {
        self.inner.find_session(id).await
    }

    async fn rotate_session(
        &self,
        old_id: &str,
        revoked_at: DateTime<Utc>,
        new_session: &RefreshSession,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner.rotate_session(old_id, revoked_at, new_session).await
    }

    async fn revoke_session(
        &self,
        id: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.revoke_session(id, revoked_at).await
    }
}

pub struct UnreliableApp {
    pub authority: SessionAuthority<MemoryStore, UnreliableSessionStore>,
    pub sessions: Arc<UnreliableSessionStore>,
}

pub fn spawn_unreliable_app() -> UnreliableApp {
    lazy_static::initialize(&TRACING);

    let users = Arc::new(MemoryStore::new());
    let sessions = Arc::new(UnreliableSessionStore::default());
    let authority = SessionAuthority::new(&test_settings(), users, sessions.clone())
        .expect("Failed to build session authority");

    UnreliableApp {
        authority,
        sessions,
    }
}
