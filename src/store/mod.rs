/// Persistence interfaces consumed by the session authority
///
/// The authority never talks to a database directly: it depends on
/// `UserStore` and `SessionStore`, implemented here for Postgres (`PgStore`)
/// and for in-process use (`MemoryStore`).

mod memory;
mod models;
mod postgres;

pub use memory::MemoryStore;
pub use models::{NewUser, RefreshSession, Role, User};
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;

/// User records, owned by the external store
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;

    /// Insert a user. A taken email yields `StoreError::UniqueViolation`.
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;
}

/// Refresh-session records backing the session ledger
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a session. A taken id yields `StoreError::UniqueViolation`.
    async fn insert_session(&self, session: &RefreshSession) -> Result<(), StoreError>;

    async fn find_session(&self, id: &str) -> Result<Option<RefreshSession>, StoreError>;

    /// Revoke `old_id` (only if not yet revoked), link it to `new_session.id`
    /// and insert `new_session`, all or nothing.
    ///
    /// Returns `StoreError::AlreadyRevoked` when `old_id` was revoked before
    /// this call and `StoreError::NotFound` when it does not exist. In both
    /// cases, and on any other error, no row is changed.
    async fn rotate_session(
        &self,
        old_id: &str,
        revoked_at: DateTime<Utc>,
        new_session: &RefreshSession,
    ) -> Result<(), StoreError>;

    /// Mark a session revoked. Returns `true` if this call revoked it and
    /// `false` if it was already revoked or does not exist.
    async fn revoke_session(&self, id: &str, revoked_at: DateTime<Utc>)
        -> Result<bool, StoreError>;
}
