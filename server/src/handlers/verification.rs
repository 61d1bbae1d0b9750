use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};

use super::registrations::parse_uuid;
use crate::models::{EventId, RegistrationId};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::success;

/// QR lookup. No caller identity is required.
pub async fn verify_registration(
    State(state): State<AppState>,
    Path((event_id, registration_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let event_id = EventId::from_uuid(parse_uuid(&event_id, "event")?);
    let registration_id = RegistrationId::from_uuid(parse_uuid(&registration_id, "registration")?);

    let verification = state.verifier.verify(&event_id, &registration_id).await?;
    Ok(success(verification, "Registration verified").into_response())
}
