/// Refresh Session Ledger
///
/// Server-side record of every refresh token issued. Sessions are:
/// - keyed by the refresh token's `jti`
/// - created at signup/login
/// - revoked and linked to their successor by rotation, or revoked by logout
/// - never deleted, so a replayed token can still be recognised

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use crate::error::{AppError, StoreError};
use crate::store::{RefreshSession, SessionStore};

/// Longest `replaced_by` chain followed when revoking a session family.
const MAX_FAMILY_DEPTH: usize = 10_000;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A session id was issued twice. 128-bit random ids make this an integrity fault.
    #[error("duplicate refresh session id {0}")]
    DuplicateId(String),
    #[error("refresh session {0} already revoked")]
    AlreadyRevoked(String),
    #[error("refresh session {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Store(StoreError),
}

impl LedgerError {
    fn from_store(err: StoreError, id: &str) -> Self {
        match err {
            StoreError::UniqueViolation(_) => LedgerError::DuplicateId(id.to_string()),
            StoreError::AlreadyRevoked(_) => LedgerError::AlreadyRevoked(id.to_string()),
            StoreError::NotFound(_) => LedgerError::NotFound(id.to_string()),
            other => LedgerError::Store(other),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::DuplicateId(_) => AppError::IntegrityFault(err.to_string()),
            LedgerError::AlreadyRevoked(_) | LedgerError::NotFound(_) => AppError::InvalidRefresh,
            LedgerError::Store(e) => AppError::Store(e),
        }
    }
}

pub struct SessionLedger<S> {
    store: Arc<S>,
}

impl<S> Clone for SessionLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: SessionStore> SessionLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Record a newly issued refresh session.
    pub async fn create(&self, session: &RefreshSession) -> Result<(), LedgerError> {
        self.store.insert_session(session).await.map_err(|e| {
            let err = LedgerError::from_store(e, &session.id);
            if matches!(err, LedgerError::DuplicateId(_)) {
                tracing::error!(session_id = %session.id, "Refresh session id collision");
            }
            err
        })
    }

    pub async fn lookup(&self, id: &str) -> Result<Option<RefreshSession>, LedgerError> {
        self.store
            .find_session(id)
            .await
            .map_err(|e| LedgerError::from_store(e, id))
    }

    /// Atomically revoke `old_id`, link it to `new_session` and record `new_session`.
    ///
    /// Of several concurrent rotations of the same session exactly one
    /// succeeds; the others get `LedgerError::AlreadyRevoked`.
    pub async fn rotate(&self, old_id: &str, new_session: &RefreshSession) -> Result<(), LedgerError> {
        self.store
            .rotate_session(old_id, Utc::now(), new_session)
            .await
            .map_err(|e| match e {
                StoreError::UniqueViolation(_) => {
                    tracing::error!(session_id = %new_session.id, "Refresh session id collision");
                    LedgerError::DuplicateId(new_session.id.clone())
                }
                other => LedgerError::from_store(other, old_id),
            })?;

        tracing::debug!(old_session_id = %old_id, new_session_id = %new_session.id, "Refresh session rotated");
        Ok(())
    }

    /// Revoke a session. Idempotent: an already revoked or unknown session
    /// is not an error. Returns whether this call did the revoking.
    pub async fn revoke(&self, id: &str) -> Result<bool, LedgerError> {
        self.store
            .revoke_session(id, Utc::now())
            .await
            .map_err(|e| LedgerError::from_store(e, id))
    }

    /// Revoke every still-active session descending from `id` through
    /// `replaced_by` links. Returns how many sessions were revoked.
    pub async fn revoke_descendants(&self, id: &str) -> Result<usize, LedgerError> {
        let mut revoked = 0;
        let mut visited = HashSet::new();
        visited.insert(id.to_string());

        let mut next = self.lookup(id).await?.and_then(|s| s.replaced_by);
        while let Some(current) = next {
            if !visited.insert(current.clone()) || visited.len() > MAX_FAMILY_DEPTH {
                tracing::error!(session_id = %current, "Refresh session chain loops or is too long");
                break;
            }
            if self.revoke(&current).await? {
                revoked += 1;
            }
            next = self.lookup(&current).await?.and_then(|s| s.replaced_by);
        }

        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
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
            user_agent: None,
            client_address: None,
        }
    }

    fn ledger() -> SessionLedger<MemoryStore> {
        SessionLedger::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let ledger = ledger();
        let created = session("s1");
        ledger.create(&created).await.unwrap();

        assert_eq!(ledger.lookup("s1").await.unwrap(), Some(created));
        assert!(ledger.lookup("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_create_is_integrity_fault() {
        let ledger = ledger();
        ledger.create(&session("s1")).await.unwrap();

        let err = ledger.create(&session("s1")).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateId(_)));
        assert!(matches!(AppError::from(err), AppError::IntegrityFault(_)));
    }

    #[tokio::test]
    async fn test_rotate_twice_fails_second_time() {
        let ledger = ledger();
        ledger.create(&session("s1")).await.unwrap();

        ledger.rotate("s1", &session("s2")).await.unwrap();
        let err = ledger.rotate("s1", &session("s3")).await.unwrap_err();

        assert!(matches!(err, LedgerError::AlreadyRevoked(_)));
        assert!(matches!(AppError::from(err), AppError::InvalidRefresh));
    }

    #[tokio::test]
    async fn test_rotate_unknown_session() {
        let err = ledger().rotate("nope", &session("s2")).await.unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let ledger = ledger();
        ledger.create(&session("s1")).await.unwrap();

        assert!(ledger.revoke("s1").await.unwrap());
        assert!(!ledger.revoke("s1").await.unwrap());
        assert!(!ledger.revoke("unknown").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_descendants_walks_chain() {
        let ledger = ledger();
        ledger.create(&session("s1")).await.unwrap();
        ledger.rotate("s1", &session("s2")).await.unwrap();
        ledger.rotate("s2", &session("s3")).await.unwrap();

        assert_eq!(ledger.revoke_descendants("s1").await.unwrap(), 1);

        let tail = ledger.lookup("s3").await.unwrap().unwrap();
        assert!(tail.is_revoked());
        assert_eq!(ledger.revoke_descendants("s1").await.unwrap(), 0);
    }
}
