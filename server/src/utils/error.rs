use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::admission::error::AdmissionError;
use crate::store::StoreError;
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(rejection) => AppError::Admission(rejection),
            // Outside the admission retry loop a conflict is reported after one try.
            StoreError::Conflict => {
                AppError::Admission(AdmissionError::TransientConflict { attempts: 1 })
            }
            StoreError::Database(e) => AppError::DatabaseError(e),
            StoreError::Corrupt(msg) => AppError::InternalServerError(msg),
        }
    }
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Admission(rejection) => rejection.status_code(),
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Admission(rejection) => rejection.code(),
            AppError::AuthError(_) => "AUTH_ERROR",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    fn log(&self) {
        match self {
            AppError::Admission(AdmissionError::TransientConflict { attempts }) => {
                warn!(attempts, "Registration gave up after repeated conflicts");
            }
            AppError::Admission(rejection) => {
                info!(code = rejection.code(), message = %rejection, "Registration rejected");
            }
            AppError::AuthError(msg) | AppError::Forbidden(msg) => {
                warn!(error = ?self, message = %msg, "Request denied");
            }
            AppError::InternalServerError(msg) => {
                error!(error = ?self, message = %msg, "Application error");
            }
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log internal details
        self.log();

        // Only expose high-level message to the client
        let public_message = match &self {
            AppError::Admission(rejection) => rejection.to_string(),
            AppError::AuthError(msg) | AppError::Forbidden(msg) => msg.clone(),
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalServerError(_) => "An internal error occurred".to_string(),
        };

        // Lost races tell the caller how many attempts were made so it can back off.
        let details = match &self {
            AppError::Admission(AdmissionError::TransientConflict { attempts }) => {
                Some(json!({ "attempts": attempts, "retryable": true }))
            }
            _ => None,
        };

        error_response(code, public_message, details, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventId;

    #[test]
    fn test_store_rejection_keeps_its_kind() {
        let event_id = EventId::new();
        let err = AppError::from(StoreError::Rejected(AdmissionError::AlreadyRegistered {
            event_id,
            program_id: None,
        }));
        assert_eq!(err.code(), "ALREADY_REGISTERED");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_store_conflict_is_transient() {
        let err = AppError::from(StoreError::Conflict);
        assert_eq!(err.code(), "TRANSIENT_CONFLICT");
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_corrupt_record_is_internal() {
        let err = AppError::from(StoreError::Corrupt("negative quantity".to_string()));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_auth_error_status() {
        let err = AppError::AuthError("missing x-user-id header".to_string());
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.code(), "AUTH_ERROR");
    }
}
