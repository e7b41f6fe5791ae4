/// Input validators for the signup and login protocols
/// Rejects missing fields and malformed input before any hashing or store access:
/// 1. Length limits (bounds the cost of hashing and storage)
/// 2. Email format validation
/// 3. Control-character screening for display names

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ValidationError;

const MAX_EMAIL_LENGTH: usize = 254; // RFC 5321
const MIN_EMAIL_LENGTH: usize = 3;
const MAX_LOCAL_PART_LENGTH: usize = 64;
const MAX_PASSWORD_LENGTH: usize = 128;
const MAX_NAME_LENGTH: usize = 256;

lazy_static! {
    // RFC 5322 simplified email regex (practical validation)
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$"
    ).expect("email regex is valid");
}

/// Validates an email address
/// - Trims surrounding whitespace; case is preserved
/// - Checks length constraints and format
pub fn validate_email(email: &str) -> Result<String, ValidationError> {
    let trimmed = email.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyField("email"));
    }

    if trimmed.len() < MIN_EMAIL_LENGTH {
        return Err(ValidationError::TooShort("email", MIN_EMAIL_LENGTH));
    }

    if trimmed.len() > MAX_EMAIL_LENGTH {
        return Err(ValidationError::TooLong("email", MAX_EMAIL_LENGTH));
    }

    if !EMAIL_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidFormat("email"));
    }

    if has_suspicious_email_patterns(trimmed) {
        return Err(ValidationError::SuspiciousContent("email"));
    }

    Ok(trimmed.to_string())
}

/// Validates a plaintext password
///
/// Only presence and an upper bound are enforced; the upper bound keeps a
/// single request from buying an arbitrarily expensive key derivation.
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::EmptyField("password"));
    }

    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(ValidationError::TooLong("password", MAX_PASSWORD_LENGTH));
    }

    Ok(())
}

/// Validates an optional display name
///
/// A missing or blank name is accepted as `None`.
pub fn validate_name(name: Option<&str>) -> Result<Option<String>, ValidationError> {
    let trimmed = match name.map(str::trim) {
        None | Some("") => return Ok(None),
        Some(trimmed) => trimmed,
    };

    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(ValidationError::TooLong("name", MAX_NAME_LENGTH));
    }

    if trimmed.chars().any(|c| c.is_control()) {
        return Err(ValidationError::SuspiciousContent("name"));
    }

    Ok(Some(trimmed.to_string()))
}

fn has_suspicious_email_patterns(email: &str) -> bool {
    if let Some(at_pos) = email.find('@') {
        if at_pos > MAX_LOCAL_PART_LENGTH {
            return true;
        }
    }

    if email.matches('@').count() != 1 {
        return true;
    }

    email.contains('\0')
}
