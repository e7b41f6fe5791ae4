use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role claim carried in tokens. No policy is attached to it here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    /// Unknown role strings fall back to `User`.
    pub fn parse(value: &str) -> Self {
        match value {
            "admin" => Role::Admin,
            _ => Role::User,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: Option<String>,
    pub password_hash: String,
    pub role: Role,
}

/// A refresh token's server-side record.
///
/// `id` is the refresh token's `jti`. Rows are never deleted: rotated and
/// logged-out sessions stay behind for audit and replay detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSession {
    pub id: String,
    pub user_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    /// `id` of the session that superseded this one during rotation
    pub replaced_by: Option<String>,
    pub user_agent: Option<String>,
    pub client_address: Option<String>,
}

impl RefreshSession {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Valid iff not revoked, not expired and owned by `subject`.
    pub fn is_valid_for(&self, subject: &str, now: DateTime<Utc>) -> bool {
        !self.is_revoked() && !self.is_expired_at(now) && self.user_id == subject
    }
}
