/// Error Handling Module
///
/// One error taxonomy for every protocol the session authority exposes:
/// 1. Domain-specific error types (validation, store, configuration)
/// 2. The unified `AppError` returned by signup, login, refresh and logout
/// 3. HTTP status mapping for the routing layer
/// 4. Structured error logging with request context

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};

/// ============================================================================
/// 1. DOMAIN-SPECIFIC ERROR TYPES
/// ============================================================================

/// Validation errors for caller-supplied input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is empty")]
    EmptyField(&'static str),
    #[error("{0} is too short (minimum {1} characters)")]
    TooShort(&'static str, usize),
    #[error("{0} is too long (maximum {1} characters)")]
    TooLong(&'static str, usize),
    #[error("{0} has invalid format")]
    InvalidFormat(&'static str),
    #[error("{0} contains suspicious content")]
    SuspiciousContent(&'static str),
}

/// Errors raised by the user and session stores
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Duplicate entry: {0}")]
    UniqueViolation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    /// A conditional update found the session already revoked.
    #[error("Session already revoked: {0}")]
    AlreadyRevoked(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Store error: {0}")]
    Unexpected(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                // 23505 = unique_violation
                if db_err.code().as_deref() == Some("23505") {
                    StoreError::UniqueViolation(db_err.message().to_string())
                } else {
                    StoreError::Unexpected(db_err.message().to_string())
                }
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Unexpected(other.to_string()),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required config: {0}")]
    MissingRequired(String),
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
    #[error("Config load error: {0}")]
    Load(#[from] config::ConfigError),
}

/// ============================================================================
/// 2. UNIFIED APPLICATION ERROR TYPE
/// ============================================================================

/// Outcome of a failed protocol call.
///
/// `InvalidCredentials` and `InvalidRefresh` deliberately carry no detail:
/// callers must not be able to tell a bad signature from an expired or
/// revoked session.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    InvalidInput(#[from] ValidationError),
    #[error("Email already registered")]
    Conflict,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid refresh token")]
    InvalidRefresh,
    #[error("Integrity fault: {0}")]
    IntegrityFault(String),
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for failures the caller caused (bad input or failed authentication).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::InvalidInput(_)
                | AppError::Conflict
                | AppError::InvalidCredentials
                | AppError::InvalidRefresh
        )
    }
}

// ============================================================================
// 3. HTTP RESPONSE MAPPING
// ============================================================================

/// Error response structure for HTTP responses
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    /// Unique error ID for tracking (request ID or trace ID)
    pub error_id: String,
    /// Human-readable error message
    pub message: String,
    /// Error code for client-side handling
    pub code: String,
    /// HTTP status code
    pub status: u16,
    /// Timestamp when error occurred
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_id: String, message: String, code: String, status: u16) -> Self {
        Self {
            error_id,
            message,
            code,
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Trait for converting errors to HTTP responses with proper logging
pub trait ErrorHandler {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse);
    fn log_error(&self, request_id: &str);
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Conflict => (StatusCode::CONFLICT, "DUPLICATE_ENTRY"),
            AppError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
            AppError::InvalidRefresh => (StatusCode::UNAUTHORIZED, "INVALID_REFRESH"),
            AppError::Store(StoreError::Unavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE")
            }
            AppError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            AppError::IntegrityFault(_) | AppError::Config(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }
}

impl ErrorHandler for AppError {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse) {
        let (status, code) = self.status_and_code();

        // Only validation messages are echoed; everything else gets a fixed text.
        let message = match self {
            AppError::InvalidInput(e) => e.to_string(),
            AppError::Conflict => "Email already registered".to_string(),
            AppError::InvalidCredentials => "Invalid credentials".to_string(),
            AppError::InvalidRefresh => "Invalid refresh token".to_string(),
            AppError::Store(StoreError::Unavailable(_)) => {
                "Database service temporarily unavailable".to_string()
            }
            _ => "Internal server error".to_string(),
        };

        let error_response = ErrorResponse::new(
            request_id.to_string(),
            message,
            code.to_string(),
            status.as_u16(),
        );

        (status, error_response)
    }

    fn log_error(&self, request_id: &str) {
        match self {
            AppError::InvalidInput(e) => {
                tracing::warn!(request_id = request_id, error = %e, "Validation error");
            }
            AppError::Conflict => {
                tracing::warn!(request_id = request_id, "Duplicate signup attempt");
            }
            AppError::InvalidCredentials | AppError::InvalidRefresh => {
                tracing::warn!(request_id = request_id, error = %self, "Authentication error");
            }
            AppError::IntegrityFault(msg) => {
                tracing::error!(request_id = request_id, error = %msg, "Integrity fault");
            }
            AppError::Store(e) => {
                tracing::error!(request_id = request_id, error = %e, "Store error");
            }
            AppError::Config(e) => {
                tracing::error!(request_id = request_id, error = %e, "Configuration error");
            }
            AppError::Internal(msg) => {
                tracing::error!(request_id = request_id, error = %msg, "Internal error");
            }
        }
    }
}

/// Lets the routing layer return `AppError` straight from an actix-web handler.
///
/// This path has no request id and makes one up. Handlers that passed a
/// `request_id` in `ClientContext` should answer with
/// `ErrorHandler::error_response(&err, request_id)` so `error_id` matches the logs.
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let request_id = uuid::Uuid::new_v4().to_string();
        self.log_error(&request_id);

        let (status, error_response) = <Self as ErrorHandler>::error_response(self, &request_id);

        HttpResponse::build(status).json(error_response)
    }

    fn status_code(&self) -> StatusCode {
        self.status_and_code().0
    }
}

// ============================================================================
// 4. ERROR CONTEXT ENRICHMENT
// ============================================================================

/// Per-call context for log correlation
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub request_id: String,
    pub user_id: Option<String>,
    pub operation: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            user_id: None,
            operation: operation.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_request_id(mut self, request_id: String) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_user_id(mut self, user_id: String) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn log_error(&self, error: &AppError) {
        let context = serde_json::json!({
            "request_id": self.request_id,
            "operation": self.operation,
            "user_id": self.user_id,
            "timestamp": self.timestamp.to_rfc3339(),
        });

        if error.is_client_error() {
            tracing::warn!(error = %error, context = %context, "Request rejected");
        } else {
            tracing::error!(error = %error, context = %context, "Request failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::EmptyField("email");
        assert_eq!(err.to_string(), "email is empty");
    }

    #[test]
    fn test_app_error_conversion() {
        let app_err: AppError = ValidationError::InvalidFormat("email").into();
        assert!(matches!(app_err, AppError::InvalidInput(_)));
        assert!(app_err.is_client_error());
    }

    #[test]
    fn test_refresh_failures_are_uniform() {
        let (status, response) =
            <AppError as ErrorHandler>::error_response(&AppError::InvalidRefresh, "req-1");
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.code, "INVALID_REFRESH");
        assert_eq!(response.message, "Invalid refresh token");
    }

    #[test]
    fn test_integrity_fault_is_generic_server_error() {
        let err = AppError::IntegrityFault("duplicate token id abc".to_string());
        let (status, response) = <AppError as ErrorHandler>::error_response(&err, "req-2");

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!response.message.contains("abc"));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::Conflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::InvalidCredentials.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Store(StoreError::Unavailable("pool".to_string())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_error_context_creation() {
        let ctx = ErrorContext::new("test_operation");
        assert_eq!(ctx.operation, "test_operation");
        assert!(ctx.user_id.is_none());

        let ctx_with_user = ctx.with_user_id("user-123".to_string());
        assert_eq!(ctx_with_user.user_id, Some("user-123".to_string()));
    }
}
