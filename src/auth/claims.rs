/// JWT Claims structure
///
/// Access and refresh tokens share this payload; they differ only in signing
/// key and lifetime. `jti` is the refresh session's primary key.

use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::store::Role;

const TOKEN_ID_BYTES: usize = 16;

/// A fresh 128-bit random token identifier, hex encoded.
pub fn new_token_id() -> String {
    let mut bytes = [0u8; TOKEN_ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    #[serde(default)]
    pub role: Role,
    /// Token identifier, unique per issuance
    pub jti: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issuer
    pub iss: String,
}

impl Claims {
    /// Claims for `subject` valid for `ttl_seconds` from now, with a fresh `jti`.
    ///
    /// `None` when the expiry does not fit in an `i64` timestamp.
    pub fn new(subject: &str, role: Role, ttl_seconds: i64, issuer: &str) -> Option<Self> {
        let now = Utc::now().timestamp();
        Some(Self {
            sub: subject.to_string(),
            role,
            jti: new_token_id(),
            iat: now,
            exp: now.checked_add(ttl_seconds)?,
            iss: issuer.to_string(),
        })
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.iat, 0).single().unwrap_or_else(Utc::now)
    }

    /// `None` if `exp` is outside chrono's representable range.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.exp, 0).single()
    }
}
