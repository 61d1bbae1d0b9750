//! Admission controller: validates a registration request, then hands it to
//! the store for an atomic check-and-commit, retrying lost races a bounded
//! number of times.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::models::{
    AttendeeInfo, Event, EventId, ProgramId, Registration, RegistrationId, UserId,
};
use crate::store::{AdmissionRequest, RegistrationStore, StoreError};
use crate::utils::error::AppError;

pub mod error;
pub mod policy;
pub mod rules;

use error::{AdmissionError, Missing};
use policy::AttendeePolicy;
use rules::AdmissionKind;

pub const DEFAULT_TICKET_TYPE: &str = "default";

/// How often a commit that lost a race is retried, and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    const MAX_BACKOFF: Duration = Duration::from_secs(1);

    /// Exponential backoff for the given retry (1-based), capped at one second.
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.backoff.saturating_mul(factor).min(Self::MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(10),
        }
    }
}

/// An event-level registration request as received from the UI.
#[derive(Debug, Clone, Default)]
pub struct EventRegistration {
    pub ticket_type: Option<String>,
    pub quantity: u32,
    pub attendee: AttendeeInfo,
    pub program_ids: BTreeSet<ProgramId>,
}

#[derive(Clone)]
pub struct AdmissionController {
    store: Arc<dyn RegistrationStore>,
    policy: Arc<dyn AttendeePolicy>,
    retry: RetryPolicy,
}

impl AdmissionController {
    pub fn new(
        store: Arc<dyn RegistrationStore>,
        policy: Arc<dyn AttendeePolicy>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            policy,
            retry,
        }
    }

    /// Registers `user_id` for the event, optionally bundling program sign-ups.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Admission`] with the first failed precondition, in
    /// this order: `ValidationError` (malformed input), `NotFound`,
    /// `RegistrationClosed`, `ValidationError` (attendee policy),
    /// `CapacityExceeded`, `AlreadyRegistered`, then per program
    /// `ProgramUnavailable`, `ProgramFull` or `AlreadyRegistered`.
    /// `TransientConflict` means every retry lost a race.
    #[tracing::instrument(
        skip(self, request),
        fields(event_id = %event_id, user_id = %user_id, quantity = request.quantity)
    )]
    pub async fn register_for_event(
        &self,
        event_id: EventId,
        user_id: UserId,
        request: EventRegistration,
    ) -> Result<Registration, AppError> {
        if request.quantity == 0 {
            return Err(AdmissionError::validation("quantity must be at least 1").into());
        }
        let ticket_type = match request.ticket_type {
            None => DEFAULT_TICKET_TYPE.to_string(),
            Some(t) if t.trim().is_empty() => {
                return Err(AdmissionError::validation("ticket type must not be empty").into())
            }
            Some(t) => t.trim().to_string(),
        };
        let kind = AdmissionKind::Event {
            quantity: request.quantity,
            program_ids: request.program_ids,
        };

        self.admit(event_id, user_id, kind, request.attendee.normalized(), ticket_type)
            .await
    }

    /// Registers `user_id` for a single program. Event status and event
    /// capacity are not consulted.
    ///
    /// # Errors
    ///
    /// `NotFound`, `ProgramUnavailable`, `ValidationError` (attendee policy),
    /// `ProgramFull`, `AlreadyRegistered`, or `TransientConflict`.
    #[tracing::instrument(
        skip(self, attendee),
        fields(event_id = %event_id, program_id = %program_id, user_id = %user_id)
    )]
    pub async fn register_for_program(
        &self,
        event_id: EventId,
        program_id: ProgramId,
        user_id: UserId,
        attendee: AttendeeInfo,
    ) -> Result<Registration, AppError> {
        self.admit(
            event_id,
            user_id,
            AdmissionKind::Program { program_id },
            attendee.normalized(),
            DEFAULT_TICKET_TYPE.to_string(),
        )
        .await
    }

    async fn admit(
        &self,
        event_id: EventId,
        user_id: UserId,
        kind: AdmissionKind,
        attendee: AttendeeInfo,
        ticket_type: String,
    ) -> Result<Registration, AppError> {
        let registration_id = RegistrationId::new();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let event = self.snapshot(&event_id).await?;
            rules::precheck(&event, &kind)?;
            self.policy.validate(&event, &attendee)?;

            let request = AdmissionRequest {
                registration_id,
                event_id,
                expected_revision: event.revision,
                user_id: user_id.clone(),
                kind: kind.clone(),
                attendee: attendee.clone(),
                ticket_type: ticket_type.clone(),
            };

            match self.store.commit_admission(request).await {
                Ok(registration) => {
                    info!(
                        registration_id = %registration.id,
                        scope = registration.scope.as_str(),
                        programs = registration.program_ids.len(),
                        attempt,
                        "Registration committed"
                    );
                    return Ok(registration);
                }
                Err(StoreError::Conflict) if attempt <= self.retry.max_retries => {
                    let delay = self.retry.delay(attempt);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "Commit lost a race, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(StoreError::Conflict) => {
                    warn!(attempts = attempt, "Retries exhausted");
                    return Err(AdmissionError::TransientConflict { attempts: attempt }.into());
                }
                Err(other) => return Err(other.into()),
            }
        }
    }

    async fn snapshot(&self, event_id: &EventId) -> Result<Event, AppError> {
        self.store
            .load_event(event_id)
            .await?
            .ok_or_else(|| AdmissionError::NotFound(Missing::Event(*event_id)).into())
    }
}
