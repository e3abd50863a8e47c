use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("User not found")]
    UserNotFound,
    #[error("Email already exists")]
    EmailAlreadyExists,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
    #[error("Missing authorization header")]
    MissingAuthHeader,
    #[error("Invalid authorization header format")]
    InvalidAuthHeaderFormat,
    #[error("Insufficient permissions")]
    InsufficientPermissions,
    #[error("Rate limit exceeded")]
    RateLimitExceeded,
    #[error("Two-factor code required")]
    TotpRequired,
    #[error("Invalid two-factor code")]
    InvalidTotp,
    #[error("Two-factor authentication is not set up")]
    TotpNotConfigured,
    #[error("Invalid or expired reset token")]
    InvalidResetToken,
    #[error("Password validation failed: {0}")]
    PasswordValidation(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("Password hashing error: {0}")]
    PasswordHashing(crate::auth::password::PasswordError),
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl From<crate::auth::password::PasswordError> for AuthError {
    fn from(err: crate::auth::password::PasswordError) -> Self {
        if err.is_policy_violation() {
            AuthError::PasswordValidation(err.to_string())
        } else {
            AuthError::PasswordHashing(err)
        }
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AuthError::Validation(crate::models::describe_validation_errors(&errors))
    }
}

impl AuthError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AuthError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
            AuthError::UserNotFound => (StatusCode::NOT_FOUND, "user_not_found"),
            AuthError::EmailAlreadyExists => (StatusCode::CONFLICT, "email_already_exists"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token"),
            AuthError::TokenExpired => (StatusCode::UNAUTHORIZED, "token_expired"),
            AuthError::MissingAuthHeader => (StatusCode::UNAUTHORIZED, "missing_auth_header"),
            AuthError::InvalidAuthHeaderFormat => (StatusCode::UNAUTHORIZED, "invalid_auth_header"),
            AuthError::InsufficientPermissions => (StatusCode::FORBIDDEN, "insufficient_permissions"),
            AuthError::RateLimitExceeded => (StatusCode::TOO_MANY_REQUESTS, "rate_limit_exceeded"),
            AuthError::TotpRequired => (StatusCode::UNAUTHORIZED, "totp_required"),
            AuthError::InvalidTotp => (StatusCode::UNAUTHORIZED, "invalid_totp"),
            AuthError::TotpNotConfigured => (StatusCode::BAD_REQUEST, "totp_not_configured"),
            AuthError::InvalidResetToken => (StatusCode::BAD_REQUEST, "invalid_reset_token"),
            AuthError::PasswordValidation(_) => (StatusCode::BAD_REQUEST, "password_validation"),
            AuthError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AuthError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AuthError::Jwt(_) => (StatusCode::UNAUTHORIZED, "token_error"),
            AuthError::PasswordHashing(_) => (StatusCode::INTERNAL_SERVER_ERROR, "password_processing_error"),
            AuthError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            tracing::error!("Authentication failure: {:?}", self);
        }

        let message = if status.is_server_error() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}
