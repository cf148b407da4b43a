//! Error envelope for HTTP handlers.
//!
//! Bridges the coordinator/auth taxonomies to HTTP responses. Drivers see
//! generic messages for internal faults and specific messages for validation
//! issues; the error `code` carries the kind for admin clients.

use crate::auth::AuthError;
use crate::coordinator::CoordinatorError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: String,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
        }
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            message.into(),
            "BAD_REQUEST".to_string(),
        )
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            message.into(),
            "UNAUTHORIZED".to_string(),
        )
    }

    /// Create a 403 Forbidden error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            message.into(),
            "FORBIDDEN".to_string(),
        )
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(what: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{what} not found"),
            "NOT_FOUND".to_string(),
        )
    }

    /// Create a 409 Conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message.into(), "CONFLICT".to_string())
    }

    /// Create a 422 Unprocessable Entity error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            message.into(),
            "VALIDATION_ERROR".to_string(),
        )
    }

    /// Create a 500 Internal Server Error with a generic driver-facing
    /// message.
    #[must_use]
    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Something went wrong, please try again".to_string(),
            "INTERNAL_SERVER_ERROR".to_string(),
        )
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            message.into(),
            "SERVICE_UNAVAILABLE".to_string(),
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                code = %self.code,
                message = %self.message,
                "internal server error"
            );
        }
        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CoordinatorError> for AppError {
    fn from(err: CoordinatorError) -> Self {
        match &err {
            CoordinatorError::ValidationFailed { .. } => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                err.to_string(),
                "VALIDATION_ERROR".to_string(),
            ),
            CoordinatorError::NotFound { what } => Self::not_found(what),
            CoordinatorError::RegistrationClosed => Self::new(
                StatusCode::CONFLICT,
                err.to_string(),
                "REGISTRATION_CLOSED".to_string(),
            ),
            CoordinatorError::DuplicateEntry => Self::new(
                StatusCode::CONFLICT,
                err.to_string(),
                "DUPLICATE_ENTRY".to_string(),
            ),
            CoordinatorError::SignatureInvalid => Self::new(
                StatusCode::BAD_REQUEST,
                err.to_string(),
                "SIGNATURE_INVALID".to_string(),
            ),
            CoordinatorError::PaymentStateMismatch { .. } => Self::new(
                StatusCode::CONFLICT,
                err.to_string(),
                "PAYMENT_STATE_MISMATCH".to_string(),
            ),
            CoordinatorError::DiscountInvalid { .. } => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                err.to_string(),
                "DISCOUNT_INVALID".to_string(),
            ),
            CoordinatorError::GatewayConstructionFailed { .. } => {
                tracing::error!(error = %err, "gateway construction failed");
                Self::internal()
            }
            CoordinatorError::StoreUnavailable { .. } => {
                tracing::error!(error = %err, "store unavailable");
                Self::unavailable("Service temporarily unavailable, please try again")
            }
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match &err {
            AuthError::InvalidCredentials => Self::unauthorized("Invalid email or password"),
            AuthError::AccountPending => Self::new(
                StatusCode::FORBIDDEN,
                "Your registration is still awaiting approval".to_string(),
                "ACCOUNT_PENDING".to_string(),
            ),
            AuthError::AccountRejected => Self::new(
                StatusCode::FORBIDDEN,
                "Your registration was not approved".to_string(),
                "ACCOUNT_REJECTED".to_string(),
            ),
            AuthError::TokenInvalid | AuthError::TokenExpired => {
                Self::bad_request(err.to_string())
            }
            AuthError::StoreUnavailable(_) => {
                tracing::error!(error = %err, "store unavailable during auth");
                Self::unavailable("Service temporarily unavailable, please try again")
            }
            AuthError::Hashing => {
                tracing::error!(error = %err, "credential hashing failed");
                Self::internal()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code() {
        let err = AppError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid input");
    }

    #[test]
    fn coordinator_mapping() {
        let err: AppError = CoordinatorError::RegistrationClosed.into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, "REGISTRATION_CLOSED");

        let err: AppError = CoordinatorError::StoreUnavailable {
            reason: "down".to_string(),
        }
        .into();
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(
            !err.message.contains("down"),
            "internal detail must not leak to drivers"
        );
    }

    #[test]
    fn auth_mapping() {
        let err: AppError = AuthError::InvalidCredentials.into();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
    }
}
