use crate::error::ConfigError;

/// Access tokens live for 15 minutes.
pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;
/// Refresh tokens (and their sessions) live for 7 days.
pub const REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
/// PBKDF2 iteration count for newly hashed passwords.
pub const DEFAULT_HASH_ITERATIONS: u32 = 120_000;
/// HS256 keys shorter than this are rejected.
pub const MIN_SECRET_LENGTH: usize = 32;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub auth: AuthSettings,
}

#[derive(serde::Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

/// Credential and session settings handed to the authority at construction
#[derive(serde::Deserialize, Clone)]
pub struct AuthSettings {
    /// HMAC key for access tokens
    pub access_secret: String,
    /// HMAC key for refresh tokens, independent of `access_secret`
    pub refresh_secret: String,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_seconds: i64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_seconds: i64,
    #[serde(default = "default_iterations")]
    pub hash_iterations: u32,
    /// Revoke every descendant session when a rotated-away refresh token is replayed.
    #[serde(default)]
    pub revoke_family_on_replay: bool,
}

fn default_issuer() -> String {
    "session-authority".to_string()
}

fn default_access_ttl() -> i64 {
    ACCESS_TOKEN_TTL_SECONDS
}

fn default_refresh_ttl() -> i64 {
    REFRESH_TOKEN_TTL_SECONDS
}

fn default_iterations() -> u32 {
    DEFAULT_HASH_ITERATIONS
}

impl AuthSettings {
    /// Settings with the given keys and every other field at its default.
    pub fn new(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            issuer: default_issuer(),
            access_token_ttl_seconds: ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: REFRESH_TOKEN_TTL_SECONDS,
            hash_iterations: DEFAULT_HASH_ITERATIONS,
            revoke_family_on_replay: false,
        }
    }

    pub fn with_hash_iterations(mut self, iterations: u32) -> Self {
        self.hash_iterations = iterations;
        self
    }

    pub fn with_revoke_family_on_replay(mut self, enabled: bool) -> Self {
        self.revoke_family_on_replay = enabled;
        self
    }

    /// Reject key material and limits that would weaken the authority.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_secret.is_empty() {
            return Err(ConfigError::MissingRequired("auth.access_secret".to_string()));
        }
        if self.refresh_secret.is_empty() {
            return Err(ConfigError::MissingRequired("auth.refresh_secret".to_string()));
        }
        if self.access_secret.len() < MIN_SECRET_LENGTH
            || self.refresh_secret.len() < MIN_SECRET_LENGTH
        {
            return Err(ConfigError::InvalidValue(format!(
                "token secrets must be at least {} bytes",
                MIN_SECRET_LENGTH
            )));
        }
        if self.access_secret == self.refresh_secret {
            return Err(ConfigError::InvalidValue(
                "access and refresh secrets must differ".to_string(),
            ));
        }
        if self.access_token_ttl_seconds <= 0 || self.refresh_token_ttl_seconds <= 0 {
            return Err(ConfigError::InvalidValue(
                "token lifetimes must be positive".to_string(),
            ));
        }
        if self.hash_iterations == 0 {
            return Err(ConfigError::InvalidValue(
                "hash_iterations must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("issuer", &self.issuer)
            .field("access_token_ttl_seconds", &self.access_token_ttl_seconds)
            .field("refresh_token_ttl_seconds", &self.refresh_token_ttl_seconds)
            .field("hash_iterations", &self.hash_iterations)
            .field("revoke_family_on_replay", &self.revoke_family_on_replay)
            .finish_non_exhaustive()
    }
}

/// Load settings from `configuration.*` (optional) overlaid with `APP__*` environment variables.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(config::Environment::with_prefix("APP").separator("__"))
        .build()?;
    let settings = settings.try_deserialize::<Settings>()?;
    settings.auth.validate()?;
    Ok(settings)
}
