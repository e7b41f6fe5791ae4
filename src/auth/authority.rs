/// Session Authority
///
/// Signup, login, refresh-rotation and logout protocols. The authority is
/// stateless: all mutable state lives in the user store and the session
/// ledger, so any number of authorities may share one store.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::auth::claims::{new_token_id, Claims};
use crate::auth::jwt::{MintedToken, TokenClass, TokenError, TokenMinter};
use crate::auth::ledger::SessionLedger;
use crate::auth::password::{CredentialHasher, EncodedHash};
use crate::configuration::AuthSettings;
use crate::error::{AppError, ErrorContext, StoreError};
use crate::store::{NewUser, RefreshSession, Role, SessionStore, User, UserStore};
use crate::validators::{validate_email, validate_name, validate_password};

/// Best-effort client metadata stored with each refresh session
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub user_agent: Option<String>,
    pub client_address: Option<String>,
    /// Request id assigned by the routing layer; log lines of the call carry it.
    /// A fresh one is generated when absent.
    pub request_id: Option<String>,
}

impl ClientContext {
    fn error_context(&self, operation: &str) -> ErrorContext {
        let context = ErrorContext::new(operation);
        match &self.request_id {
            Some(request_id) => context.with_request_id(request_id.clone()),
            None => context,
        }
    }
}

/// Public view of a user; never includes the password hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub role: Role,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
        }
    }
}

/// Result of signup and login
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user: UserProfile,
    pub access_token: String,
    /// Handed to the routing layer for transport (e.g. an HTTP-only cookie)
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// Result of a refresh rotation
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

pub struct SessionAuthority<U, S> {
    users: Arc<U>,
    ledger: SessionLedger<S>,
    hasher: CredentialHasher,
    minter: TokenMinter,
    revoke_family_on_replay: bool,
    /// Verified against when the email is unknown, so that path costs a full derivation too.
    dummy_hash: EncodedHash,
}

impl<U, S> SessionAuthority<U, S>
where
    U: UserStore,
    S: SessionStore,
{
    /// Build an authority from validated settings.
    pub fn new(settings: &AuthSettings, users: Arc<U>, sessions: Arc<S>) -> Result<Self, AppError> {
        settings.validate()?;

        let hasher = CredentialHasher::new(settings.hash_iterations);
        let dummy_hash = hasher.hash(&new_token_id());

        Ok(Self {
            users,
            ledger: SessionLedger::new(sessions),
            hasher,
            minter: TokenMinter::new(settings),
            revoke_family_on_replay: settings.revoke_family_on_replay,
            dummy_hash,
        })
    }

    pub fn ledger(&self) -> &SessionLedger<S> {
        &self.ledger
    }

    pub fn minter(&self) -> &TokenMinter {
        &self.minter
    }

    /// Validate a bearer access token for the routing layer.
    pub fn verify_access_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.minter.verify(token, TokenClass::Access)
    }

    /// Register a user and open their first session.
    ///
    /// # Errors
    /// - `InvalidInput`: missing or malformed email/password/name
    /// - `Conflict`: email already registered
    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
        client: &ClientContext,
    ) -> Result<AuthSession, AppError> {
        let context = client.error_context("user_signup");

        let typed = validate_email(email)?;
        validate_password(password)?;
        let name = validate_name(name)?;

        // New accounts are stored lowercased; an older record may still hold the typed case.
        let email = typed.to_lowercase();
        if self.find_user(&typed).await?.is_some() {
            tracing::warn!(request_id = %context.request_id, "Signup with registered email");
            return Err(AppError::Conflict);
        }

        let password_hash = self.hash_password(password).await?;

        let user = self
            .users
            .create_user(NewUser {
                email,
                name,
                password_hash: password_hash.to_string(),
                role: Role::default(),
            })
            .await
            .map_err(|e| match e {
                // Lost a race with a concurrent signup for the same email.
                StoreError::UniqueViolation(_) => AppError::Conflict,
                other => AppError::Store(other),
            })?;

        let session = self.open_session(&user, client, &context).await?;

        tracing::info!(
            request_id = %context.request_id,
            user_id = %user.id,
            "User registered successfully"
        );

        Ok(session)
    }

    /// Authenticate with email and password and open a new session.
    ///
    /// Unknown email and wrong password are indistinguishable to the caller.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: &ClientContext,
    ) -> Result<AuthSession, AppError> {
        let context = client.error_context("user_login");

        let email = validate_email(email)?;
        validate_password(password)?;

        let user = match self.find_user(&email).await? {
            Some(user) => user,
            None => {
                self.verify_password(password, self.dummy_hash.clone()).await?;
                tracing::warn!(request_id = %context.request_id, "Login for unknown email");
                return Err(AppError::InvalidCredentials);
            }
        };

        let stored: EncodedHash = user.password_hash.parse().map_err(|e| {
            let err = AppError::IntegrityFault(format!("malformed password hash: {}", e));
            context.clone().with_user_id(user.id.clone()).log_error(&err);
            err
        })?;

        if !self.verify_password(password, stored).await? {
            tracing::warn!(
                request_id = %context.request_id,
                user_id = %user.id,
                "Login with wrong password"
            );
            return Err(AppError::InvalidCredentials);
        }

        let session = self.open_session(&user, client, &context).await?;

        tracing::info!(
            request_id = %context.request_id,
            user_id = %user.id,
            "User logged in successfully"
        );

        Ok(session)
    }

    /// Exchange a refresh token for a new access/refresh pair, revoking the
    /// presented one.
    ///
    /// Every authentication failure is `AppError::InvalidRefresh`, whatever
    /// the cause. If two calls race with the same token, at most one wins.
    pub async fn refresh(&self, refresh_token: &str, client: &ClientContext) -> Result<TokenPair, AppError> {
        let context = client.error_context("token_refresh");

        let claims = match self.minter.verify(refresh_token, TokenClass::Refresh) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!(request_id = %context.request_id, error = %e, "Refresh token rejected");
                return Err(AppError::InvalidRefresh);
            }
        };

        let session = match self.ledger.lookup(&claims.jti).await? {
            Some(session) => session,
            None => {
                tracing::warn!(
                    request_id = %context.request_id,
                    session_id = %claims.jti,
                    "Refresh session not found"
                );
                return Err(AppError::InvalidRefresh);
            }
        };

        if !session.is_valid_for(&claims.sub, Utc::now()) {
            if session.user_id != claims.sub {
                tracing::warn!(
                    request_id = %context.request_id,
                    session_id = %session.id,
                    "Refresh session owner does not match token subject"
                );
            } else if session.is_revoked() {
                self.handle_replay(&session, &context).await;
            } else {
                tracing::info!(
                    request_id = %context.request_id,
                    session_id = %session.id,
                    "Refresh session expired"
                );
            }
            return Err(AppError::InvalidRefresh);
        }

        let user = match self.users.find_user_by_id(&claims.sub).await? {
            Some(user) => user,
            None => {
                tracing::warn!(
                    request_id = %context.request_id,
                    user_id = %claims.sub,
                    "Refresh for unknown user"
                );
                return Err(AppError::InvalidRefresh);
            }
        };

        let access = self.mint(TokenClass::Access, &user)?;
        let refresh = self.mint(TokenClass::Refresh, &user)?;
        let next_session = new_session(&refresh.claims, client)?;

        if let Err(e) = self.ledger.rotate(&session.id, &next_session).await {
            let err = AppError::from(e);
            context.clone().with_user_id(user.id.clone()).log_error(&err);
            return Err(err);
        }

        tracing::info!(
            request_id = %context.request_id,
            user_id = %user.id,
            session_id = %next_session.id,
            "Token refreshed successfully"
        );

        Ok(TokenPair {
            access_token: access.token,
            refresh_token: refresh.token,
            expires_in: self.minter.access_ttl_seconds(),
        })
    }

    /// Revoke the session behind `refresh_token`, if any.
    ///
    /// Always succeeds: a missing, forged, expired or already revoked token
    /// is silently ignored so logout reveals nothing about token state.
    pub async fn logout(&self, refresh_token: Option<&str>, client: &ClientContext) {
        let context = client.error_context("user_logout");

        let token = match refresh_token {
            Some(token) => token,
            None => return,
        };

        // Expired tokens still name a session worth revoking.
        let claims = match self.minter.verify_ignoring_expiry(token, TokenClass::Refresh) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::debug!(request_id = %context.request_id, error = %e, "Logout with unusable token");
                return;
            }
        };

        match self.ledger.revoke(&claims.jti).await {
            Ok(true) => tracing::info!(
                request_id = %context.request_id,
                user_id = %claims.sub,
                session_id = %claims.jti,
                "User logged out"
            ),
            Ok(false) => tracing::debug!(
                request_id = %context.request_id,
                session_id = %claims.jti,
                "Logout for already revoked session"
            ),
            Err(e) => context
                .with_user_id(claims.sub.clone())
                .log_error(&AppError::from(e)),
        }
    }

    /// Look up `email` as typed, then lowercased.
    async fn find_user(&self, email: &str) -> Result<Option<User>, AppError> {
        if let Some(user) = self.users.find_user_by_email(email).await? {
            return Ok(Some(user));
        }
        let lowered = email.to_lowercase();
        if lowered == email {
            return Ok(None);
        }
        Ok(self.users.find_user_by_email(&lowered).await?)
    }

    async fn handle_replay(&self, session: &RefreshSession, context: &ErrorContext) {
        tracing::warn!(
            request_id = %context.request_id,
            user_id = %session.user_id,
            session_id = %session.id,
            replaced_by = ?session.replaced_by,
            "Revoked refresh token presented (possible replay)"
        );

        if !self.revoke_family_on_replay {
            return;
        }

        match self.ledger.revoke_descendants(&session.id).await {
            Ok(count) => tracing::warn!(
                request_id = %context.request_id,
                user_id = %session.user_id,
                revoked = count,
                "Revoked refresh session family after replay"
            ),
            Err(e) => context
                .clone()
                .with_user_id(session.user_id.clone())
                .log_error(&AppError::from(e)),
        }
    }

    /// Mint both tokens for `user` and record the refresh session.
    ///
    /// A session that cannot be recorded fails the whole call: a refresh token
    /// without a ledger row could never be redeemed.
    async fn open_session(
        &self,
        user: &User,
        client: &ClientContext,
        context: &ErrorContext,
    ) -> Result<AuthSession, AppError> {
        let access = self.mint(TokenClass::Access, user)?;
        let refresh = self.mint(TokenClass::Refresh, user)?;
        let session = new_session(&refresh.claims, client)?;

        if let Err(e) = self.ledger.create(&session).await {
            let err = AppError::from(e);
            context.clone().with_user_id(user.id.clone()).log_error(&err);
            return Err(err);
        }

        Ok(AuthSession {
            user: UserProfile::from(user),
            access_token: access.token,
            refresh_token: refresh.token,
            expires_in: self.minter.access_ttl_seconds(),
        })
    }

    fn mint(&self, class: TokenClass, user: &User) -> Result<MintedToken, AppError> {
        let minted = match class {
            TokenClass::Access => self.minter.mint_access(&user.id, user.role),
            TokenClass::Refresh => self.minter.mint_refresh(&user.id, user.role),
        };
        minted.map_err(|e| AppError::Internal(e.to_string()))
    }

    async fn hash_password(&self, password: &str) -> Result<EncodedHash, AppError> {
        let hasher = self.hasher;
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AppError::Internal(format!("password hashing task failed: {}", e)))
    }

    async fn verify_password(&self, password: &str, stored: EncodedHash) -> Result<bool, AppError> {
        let hasher = self.hasher;
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.verify(&password, &stored))
            .await
            .map_err(|e| AppError::Internal(format!("password verification task failed: {}", e)))
    }
}

fn new_session(claims: &Claims, client: &ClientContext) -> Result<RefreshSession, AppError> {
    let expires_at = claims
        .expires_at()
        .ok_or_else(|| AppError::Internal("refresh token expiry out of range".to_string()))?;

    Ok(RefreshSession {
        id: claims.jti.clone(),
        user_id: claims.sub.clone(),
        issued_at: claims.issued_at(),
        expires_at,
        revoked_at: None,
        replaced_by: None,
        user_agent: client.user_agent.clone(),
        client_address: client.client_address.clone(),
    })
}
