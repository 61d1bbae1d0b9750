use axum::http::StatusCode;
use thiserror::Error;

use crate::models::{EventId, EventStatus, ProgramId, RegistrationId};

/// What a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    Event(EventId),
    Registration(EventId, RegistrationId),
}

/// Why a registration request was turned away.
///
/// Every variant is local to one request. Callers render a message per kind;
/// the engine never folds one kind into another.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("{}", describe_missing(.0))]
    NotFound(Missing),

    #[error("event {event_id} is not open for registration (status: {status})")]
    RegistrationClosed {
        event_id: EventId,
        status: EventStatus,
    },

    #[error("event {event_id} has {remaining} spot(s) left, {requested} requested")]
    CapacityExceeded {
        event_id: EventId,
        requested: u32,
        remaining: u32,
    },

    #[error("{}", describe_duplicate(.event_id, .program_id))]
    AlreadyRegistered {
        event_id: EventId,
        program_id: Option<ProgramId>,
    },

    #[error("program {program_id} does not exist or does not take registrations")]
    ProgramUnavailable { program_id: ProgramId },

    #[error("program {program_id} is full")]
    ProgramFull { program_id: ProgramId },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("registration lost a concurrent update {attempts} time(s); retry later")]
    TransientConflict { attempts: u32 },
}

fn describe_missing(missing: &Missing) -> String {
    match missing {
        Missing::Event(event_id) => format!("event {event_id} was not found"),
        Missing::Registration(event_id, registration_id) => {
            format!("registration {registration_id} was not found for event {event_id}")
        }
    }
}

fn describe_duplicate(event_id: &EventId, program_id: &Option<ProgramId>) -> String {
    match program_id {
        Some(program_id) => {
            format!("already registered for program {program_id} of event {event_id}")
        }
        None => format!("already registered for event {event_id}"),
    }
}

impl AdmissionError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::RegistrationClosed { .. } => "REGISTRATION_CLOSED",
            Self::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            Self::AlreadyRegistered { .. } => "ALREADY_REGISTERED",
            Self::ProgramUnavailable { .. } => "PROGRAM_UNAVAILABLE",
            Self::ProgramFull { .. } => "PROGRAM_FULL",
            Self::ValidationError(_) => "VALIDATION_ERROR",
            Self::TransientConflict { .. } => "TRANSIENT_CONFLICT",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RegistrationClosed { .. }
            | Self::CapacityExceeded { .. }
            | Self::AlreadyRegistered { .. }
            | Self::ProgramFull { .. } => StatusCode::CONFLICT,
            Self::ProgramUnavailable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::TransientConflict { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Only lost races are worth repeating; every other kind is a final answer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientConflict { .. })
    }
}
