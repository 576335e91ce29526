//! Request handlers, one module per resource.
//!
//! Every handler that needs a role receives the request's `AuthContext` and checks it before
//! it reads the body stream, writes a blob or runs a mutating query.

pub mod analytics;
pub mod media;
pub mod posts;
pub mod session;
pub mod users;

use crate::error::{AppError, AppResult};

/// Trims `value` and rejects it when nothing is left.
pub(crate) fn required(field: &str, value: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(AppError::Validation(format!("{} is required", field)))
    } else {
        Ok(trimmed.to_string())
    }
}

/// Lower-cases and trims an email, rejecting anything without an `@` between two parts.
pub(crate) fn normalize_email(value: &str) -> AppResult<String> {
    let email = value.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(AppError::Validation("a valid email is required".to_string())),
    }
}
