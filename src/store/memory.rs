use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{NewUser, RefreshSession, SessionStore, User, UserStore};
use crate::error::StoreError;

#[derive(Default)]
struct Users {
    by_id: HashMap<String, User>,
    id_by_email: HashMap<String, String>,
}

/// In-process user and session store.
///
/// Each table sits behind one mutex, so `rotate_session` performs its
/// check-then-write under a single lock and concurrent rotations of the same
/// session serialize. Cloning shares the underlying tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    users: Arc<Mutex<Users>>,
    sessions: Arc<Mutex<HashMap<String, RefreshSession>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> Result<usize, StoreError> {
        Ok(lock(&self.sessions)?.len())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = lock(&self.users)?;
        Ok(users
            .id_by_email
            .get(email)
            .and_then(|id| users.by_id.get(id))
            .cloned())
    }

    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(lock(&self.users)?.by_id.get(id).cloned())
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let mut users = lock(&self.users)?;
        if users.id_by_email.contains_key(&user.email) {
            return Err(StoreError::UniqueViolation("users.email".to_string()));
        }

        let row = User {
            id: Uuid::new_v4().to_string(),
            email: user.email,
            name: user.name,
            password_hash: user.password_hash,
            role: user.role,
            created_at: Utc::now(),
        };
        users.id_by_email.insert(row.email.clone(), row.id.clone());
        users.by_id.insert(row.id.clone(), row.clone());
        Ok(row)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert_session(&self, session: &RefreshSession) -> Result<(), StoreError> {
        let mut sessions = lock(&self.sessions)?;
        if sessions.contains_key(&session.id) {
            return Err(StoreError::UniqueViolation(format!(
                "refresh_sessions.id {}",
                session.id
            )));
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn find_session(&self, id: &str) -> Result<Option<RefreshSession>, StoreError> {
        Ok(lock(&self.sessions)?.get(id).cloned())
    }

    async fn rotate_session(
        &self,
        old_id: &str,
        revoked_at: DateTime<Utc>,
        new_session: &RefreshSession,
    ) -> Result<(), StoreError> {
        let mut sessions = lock(&self.sessions)?;

        // Every check happens before the first write.
        match sessions.get(old_id) {
            None => return Err(StoreError::NotFound(format!("refresh session {}", old_id))),
            Some(old) if old.is_revoked() => {
                return Err(StoreError::AlreadyRevoked(old_id.to_string()))
            }
            Some(_) => {}
        }
        if sessions.contains_key(&new_session.id) {
            return Err(StoreError::UniqueViolation(format!(
                "refresh_sessions.id {}",
                new_session.id
            )));
        }

        if let Some(old) = sessions.get_mut(old_id) {
            old.revoked_at = Some(revoked_at);
            old.replaced_by = Some(new_session.id.clone());
        }
        sessions.insert(new_session.id.clone(), new_session.clone());
        Ok(())
    }

    async fn revoke_session(
        &self,
        id: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut sessions = lock(&self.sessions)?;
        match sessions.get_mut(id) {
            Some(session) if !session.is_revoked() => {
                session.revoked_at = Some(revoked_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn session(id: &str) -> RefreshSession {
        let now = Utc::now();
        RefreshSession {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            issued_at: now,
            expires_at: now + Duration::days(7),
            revoked_at: None,
            replaced_by: None,
            user_agent: Some("test-agent".to_string()),
            client_address: Some("127.0.0.1".to_string()),
        }
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.to_string(),
            name: None,
            password_hash: "pbkdf2-sha512$1$salt$00".to_string(),
            role: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_create_and_find_user() {
        let store = MemoryStore::new();
        let created = store.create_user(new_user("a@x.com")).await.unwrap();

        let by_email = store.find_user_by_email("a@x.com").await.unwrap().unwrap();
        let by_id = store.find_user_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(by_email, created);
        assert_eq!(by_id, created);
    }

    #[tokio::test]
    async fn test_duplicate_email_is_unique_violation() {
        let store = MemoryStore::new();
        store.create_user(new_user("a@x.com")).await.unwrap();

        let err = store.create_user(new_user("a@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn test_duplicate_session_id_is_unique_violation() {
        let store = MemoryStore::new();
        store.insert_session(&session("s1")).await.unwrap();

        let err = store.insert_session(&session("s1")).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn test_rotate_links_and_inserts() {
        let store = MemoryStore::new();
        store.insert_session(&session("s1")).await.unwrap();

        store
            .rotate_session("s1", Utc::now(), &session("s2"))
            .await
            .unwrap();

        let old = store.find_session("s1").await.unwrap().unwrap();
        assert!(old.is_revoked());
        assert_eq!(old.replaced_by.as_deref(), Some("s2"));
        assert!(store.find_session("s2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_second_rotation_fails_and_changes_nothing() {
        let store = MemoryStore::new();
        store.insert_session(&session("s1")).await.unwrap();
        store
            .rotate_session("s1", Utc::now(), &session("s2"))
            .await
            .unwrap();

        let err = store
            .rotate_session("s1", Utc::now(), &session("s3"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyRevoked(_)));

        let old = store.find_session("s1").await.unwrap().unwrap();
        assert_eq!(old.replaced_by.as_deref(), Some("s2"));
        assert!(store.find_session("s3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rotate_with_colliding_new_id_leaves_old_untouched() {
        let store = MemoryStore::new();
        store.insert_session(&session("s1")).await.unwrap();
        store.insert_session(&session("s2")).await.unwrap();

        let err = store
            .rotate_session("s1", Utc::now(), &session("s2"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));

        let old = store.find_session("s1").await.unwrap().unwrap();
        assert!(!old.is_revoked());
        assert!(old.replaced_by.is_none());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let store = MemoryStore::new();
        store.insert_session(&session("s1")).await.unwrap();

        assert!(store.revoke_session("s1", Utc::now()).await.unwrap());
        assert!(!store.revoke_session("s1", Utc::now()).await.unwrap());
        assert!(!store.revoke_session("missing", Utc::now()).await.unwrap());
    }
}
