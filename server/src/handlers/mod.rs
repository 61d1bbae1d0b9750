use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::models::UserId;
use crate::utils::error::AppError;
use crate::utils::response::success;

pub mod registrations;
pub mod verification;

/// Header carrying the caller's id, set by the authentication proxy.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "roster-api",
    };

    success(payload, "Health check successful").into_response()
}

/// The authenticated caller. Taken at face value from [`USER_ID_HEADER`].
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserId);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::AuthError(format!("missing {USER_ID_HEADER} header")))?;
        let user_id = raw
            .to_str()
            .map(str::trim)
            .map_err(|_| AppError::AuthError(format!("{USER_ID_HEADER} must be ASCII")))?;
        if user_id.is_empty() {
            return Err(AppError::AuthError(format!("{USER_ID_HEADER} is empty")));
        }
        Ok(CurrentUser(UserId::new(user_id)))
    }
}
