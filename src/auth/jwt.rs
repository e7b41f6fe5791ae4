/// JWT Token Minting and Validation
///
/// Access and refresh tokens are HS256 JWTs signed with independent keys, so
/// a leaked access key cannot forge refresh tokens and vice versa.

use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::auth::claims::Claims;
use crate::configuration::AuthSettings;
use crate::store::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenClass {
    Access,
    Refresh,
}

/// Why a token was not accepted
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token is malformed or its signature is invalid")]
    Malformed,
    #[error("token has expired")]
    Expired,
    #[error("token signing failed: {0}")]
    Signing(String),
}

/// A signed token together with the claims it carries
#[derive(Debug, Clone)]
pub struct MintedToken {
    pub token: String,
    pub claims: Claims,
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// Key material per token class
pub struct SigningKeys {
    access: KeyPair,
    refresh: KeyPair,
}

impl SigningKeys {
    pub fn from_settings(settings: &AuthSettings) -> Self {
        Self {
            access: KeyPair::from_secret(&settings.access_secret),
            refresh: KeyPair::from_secret(&settings.refresh_secret),
        }
    }

    fn pair(&self, class: TokenClass) -> &KeyPair {
        match class {
            TokenClass::Access => &self.access,
            TokenClass::Refresh => &self.refresh,
        }
    }
}

/// Issues and validates access and refresh tokens
#[derive(Clone)]
pub struct TokenMinter {
    keys: Arc<SigningKeys>,
    issuer: String,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl TokenMinter {
    pub fn new(settings: &AuthSettings) -> Self {
        Self {
            keys: Arc::new(SigningKeys::from_settings(settings)),
            issuer: settings.issuer.clone(),
            access_ttl_seconds: settings.access_token_ttl_seconds,
            refresh_ttl_seconds: settings.refresh_token_ttl_seconds,
        }
    }

    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    pub fn mint_access(&self, subject: &str, role: Role) -> Result<MintedToken, TokenError> {
        self.mint(TokenClass::Access, subject, role)
    }

    pub fn mint_refresh(&self, subject: &str, role: Role) -> Result<MintedToken, TokenError> {
        self.mint(TokenClass::Refresh, subject, role)
    }

    fn mint(&self, class: TokenClass, subject: &str, role: Role) -> Result<MintedToken, TokenError> {
        let ttl = match class {
            TokenClass::Access => self.access_ttl_seconds,
            TokenClass::Refresh => self.refresh_ttl_seconds,
        };
        let claims = Claims::new(subject, role, ttl, &self.issuer)
            .ok_or_else(|| TokenError::Signing("token lifetime out of range".to_string()))?;
        let token = self.sign(class, &claims)?;
        Ok(MintedToken { token, claims })
    }

    fn sign(&self, class: TokenClass, claims: &Claims) -> Result<String, TokenError> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &self.keys.pair(class).encoding,
        )
        .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Check signature, issuer and expiry.
    pub fn verify(&self, token: &str, class: TokenClass) -> Result<Claims, TokenError> {
        self.decode(token, class, true)
    }

    /// Check signature and issuer only. Used where an expired token must
    /// still identify its session, e.g. logout.
    pub fn verify_ignoring_expiry(&self, token: &str, class: TokenClass) -> Result<Claims, TokenError> {
        self.decode(token, class, false)
    }

    fn decode(&self, token: &str, class: TokenClass, check_expiry: bool) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = check_expiry;
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);

        decode::<Claims>(token, &self.keys.pair(class).decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => {
                    tracing::debug!(error = %e, "JWT validation error");
                    TokenError::Malformed
                }
            })
    }
}
