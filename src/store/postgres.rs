use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{NewUser, RefreshSession, Role, SessionStore, User, UserStore};
use crate::error::StoreError;

/// Postgres-backed user and session store (schema in `migrations/`).
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    name: Option<String>,
    password_hash: String,
    role: String,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            email: row.email,
            name: row.name,
            password_hash: row.password_hash,
            role: Role::parse(&row.role),
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    user_id: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    replaced_by: Option<String>,
    user_agent: Option<String>,
    client_address: Option<String>,
}

impl From<SessionRow> for RefreshSession {
    fn from(row: SessionRow) -> Self {
        RefreshSession {
            id: row.id,
            user_id: row.user_id,
            issued_at: row.issued_at,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            replaced_by: row.replaced_by,
            user_agent: row.user_agent,
            client_address: row.client_address,
        }
    }
}

const INSERT_SESSION: &str = r#"
    INSERT INTO refresh_sessions
        (id, user_id, issued_at, expires_at, revoked_at, replaced_by, user_agent, client_address)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
"#;

fn bind_session<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    session: &'q RefreshSession,
) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
    query
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(session.issued_at)
        .bind(session.expires_at)
        .bind(session.revoked_at)
        .bind(&session.replaced_by)
        .bind(&session.user_agent)
        .bind(&session.client_address)
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, name, password_hash, role, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, name, password_hash, role, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            INSERT INTO users (id, email, name, password_hash, role, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, email, name, password_hash, role, created_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn insert_session(&self, session: &RefreshSession) -> Result<(), StoreError> {
        bind_session(sqlx::query(INSERT_SESSION), session)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_session(&self, id: &str) -> Result<Option<RefreshSession>, StoreError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, user_id, issued_at, expires_at, revoked_at, replaced_by,
                   user_agent, client_address
            FROM refresh_sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(RefreshSession::from))
    }

    async fn rotate_session(
        &self,
        old_id: &str,
        revoked_at: DateTime<Utc>,
        new_session: &RefreshSession,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // The row lock taken here makes a concurrent rotation of the same
        // session wait, then re-check `revoked_at IS NULL` and match nothing.
        let updated = sqlx::query(
            r#"
            UPDATE refresh_sessions
            SET revoked_at = $1, replaced_by = $2
            WHERE id = $3 AND revoked_at IS NULL
            "#,
        )
        .bind(revoked_at)
        .bind(&new_session.id)
        .bind(old_id)
        .execute(&mut tx)
        .await?;

        if updated.rows_affected() == 0 {
            let exists = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM refresh_sessions WHERE id = $1",
            )
            .bind(old_id)
            .fetch_one(&mut tx)
            .await?;
            tx.rollback().await?;

            return Err(if exists == 0 {
                StoreError::NotFound(format!("refresh session {}", old_id))
            } else {
                StoreError::AlreadyRevoked(old_id.to_string())
            });
        }

        // Dropping `tx` on error rolls the update back.
        bind_session(sqlx::query(INSERT_SESSION), new_session)
            .execute(&mut tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn revoke_session(
        &self,
        id: &str,
        revoked_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_sessions
            SET revoked_at = $1
            WHERE id = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(revoked_at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
