use actix_web::{
    http::{header, StatusCode},
    HttpResponse, ResponseError,
};
use serde::Serialize;
use sqlx::Error as SqlxError;
use thiserror::Error;

pub const INVALID_CREDENTIALS: &str = "Invalid account ID or password";
pub const INVALID_TOKEN: &str = "Invalid or expired token";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Invalid or missing CSRF token")]
    CsrfRejected,

    #[error("Too many requests, retry in {retry_after} seconds")]
    RateLimited { retry_after: u64 },

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Content-Type must be application/json")]
    UnsupportedMediaType,

    #[error("Database error: {0}")]
    DatabaseError(#[from] SqlxError),

    #[error("Migration error: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Password hashing error: {0}")]
    PasswordError(String),

    #[error("Token error: {0}")]
    TokenError(#[from] jsonwebtoken::errors::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal server error")]
    InternalServerError,
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl AppError {
    pub fn unauthorized() -> Self {
        AppError::Unauthorized(INVALID_TOKEN.to_owned())
    }

    /// Message shown to the client. Infrastructure failures are masked.
    pub fn public_message(&self) -> String {
        if self.status_code() == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal server error".to_owned()
        } else {
            self.to_string()
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::CsrfRejected => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::MigrationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::PasswordError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::TokenError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("{}", self);
        }
        let mut response = HttpResponse::build(status);
        if let AppError::RateLimited { retry_after } = self {
            response.insert_header((header::RETRY_AFTER, retry_after.to_string()));
        }
        response.json(ErrorBody {
            error: self.public_message(),
        })
    }
}

impl From<AppError> for std::io::Error {
    fn from(err: AppError) -> Self {
        std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infrastructure_errors_are_masked() {
        let err = AppError::PasswordError("salt too short".into());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn user_facing_errors_keep_their_message() {
        let err = AppError::Conflict("Account ID already exists".into());
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.public_message(), "Account ID already exists");
        assert_eq!(AppError::NotFound("Bill").to_string(), "Bill not found");
    }

    #[test]
    fn rate_limited_sets_retry_after() {
        let response = AppError::RateLimited { retry_after: 42 }.error_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            "42"
        );
    }
}
