use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::CurrentUser;
use crate::admission::error::AdmissionError;
use crate::admission::EventRegistration;
use crate::models::{AttendeeInfo, EventId, ProgramId, Registration};
use crate::state::AppState;
use crate::utils::error::AppError;
use crate::utils::response::{created, success};
use crate::verification::verification_path;

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterForEventBody {
    #[serde(default)]
    pub ticket_type: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub program_ids: BTreeSet<ProgramId>,
    #[serde(flatten)]
    pub attendee: AttendeeInfo,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationReceipt {
    #[serde(flatten)]
    pub registration: Registration,
    pub verification_path: String,
}

impl From<Registration> for RegistrationReceipt {
    fn from(registration: Registration) -> Self {
        Self {
            verification_path: verification_path(&registration.event_id, &registration.id),
            registration,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    pub program_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationStatus {
    pub registered: bool,
    pub program_ids: BTreeSet<ProgramId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registered_for_program: Option<bool>,
}

pub(crate) fn parse_uuid(raw: &str, what: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| AdmissionError::validation(format!("'{raw}' is not a valid {what} id")).into())
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| AdmissionError::validation(rejection.body_text()).into())
}

fn receipt(registration: Registration, message: &str) -> Response {
    let receipt = RegistrationReceipt::from(registration);
    let location = receipt.verification_path.clone();
    created(receipt, &location, message)
}

pub async fn register_for_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    CurrentUser(user_id): CurrentUser,
    body: Result<Json<RegisterForEventBody>, JsonRejection>,
) -> Result<Response, AppError> {
    let event_id = EventId::from_uuid(parse_uuid(&event_id, "event")?);
    let body = json_body(body)?;

    let registration = state
        .admissions
        .register_for_event(
            event_id,
            user_id,
            EventRegistration {
                ticket_type: body.ticket_type,
                quantity: body.quantity,
                attendee: body.attendee,
                program_ids: body.program_ids,
            },
        )
        .await?;

    Ok(receipt(registration, "You're registered"))
}

pub async fn register_for_program(
    State(state): State<AppState>,
    Path((event_id, program_id)): Path<(String, String)>,
    CurrentUser(user_id): CurrentUser,
    body: Result<Json<AttendeeInfo>, JsonRejection>,
) -> Result<Response, AppError> {
    let event_id = EventId::from_uuid(parse_uuid(&event_id, "event")?);
    let program_id = ProgramId::from_uuid(parse_uuid(&program_id, "program")?);
    let attendee = json_body(body)?;

    let registration = state
        .admissions
        .register_for_program(event_id, program_id, user_id, attendee)
        .await?;

    Ok(receipt(registration, "You are registered for this program"))
}

/// Organizer roster. Only the event's organizer may read it.
pub async fn event_roster(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Response, AppError> {
    let event_id = EventId::from_uuid(parse_uuid(&event_id, "event")?);
    let event = state.queries.event(&event_id).await?;
    if event.organizer_id != user_id.as_str() {
        return Err(AppError::Forbidden(
            "only the organizer can list registrations".to_string(),
        ));
    }

    let registrations = state.queries.registrations_for_event(&event_id).await?;
    let count = registrations.len();
    Ok(success(registrations, format!("{count} registration(s)")).into_response())
}

pub async fn registration_status(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
    Query(query): Query<StatusQuery>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Response, AppError> {
    let event_id = EventId::from_uuid(parse_uuid(&event_id, "event")?);
    let program_id = query
        .program_id
        .as_deref()
        .map(|raw| parse_uuid(raw, "program").map(ProgramId::from_uuid))
        .transpose()?;

    let registered = state.queries.is_registered(&event_id, &user_id).await?;
    let program_ids = state
        .queries
        .registered_program_ids(&event_id, &user_id)
        .await?;
    let registered_for_program = match program_id {
        Some(program_id) => Some(
            state
                .queries
                .is_registered_for_program(&event_id, &program_id, &user_id)
                .await?,
        ),
        None => None,
    };

    let status = RegistrationStatus {
        registered,
        program_ids,
        registered_for_program,
    };
    Ok(success(status, "Registration status").into_response())
}

pub async fn my_registrations(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Response, AppError> {
    let registrations = state.queries.registrations_for_user(&user_id).await?;
    let count = registrations.len();
    Ok(success(registrations, format!("{count} registration(s)")).into_response())
}
