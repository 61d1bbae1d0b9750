//! Capacity store and registration ledger.
//!
//! A [`RegistrationStore`] owns the authoritative event counters and the
//! append-only ledger. Its one write path for registrations,
//! [`RegistrationStore::commit_admission`], runs the ordered admission rules and
//! applies their effects as a single atomic unit.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::admission::error::AdmissionError;
use crate::admission::rules::{AdmissionKind, PriorAdmissions};
use crate::models::{
    AttendeeInfo, Event, EventId, ProgramId, Registration, RegistrationId, UserId,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The admission rules turned the request down.
    #[error(transparent)]
    Rejected(#[from] AdmissionError),

    /// A precondition on the event revision failed, or the backend aborted the
    /// transaction because of a concurrent writer. Safe to retry.
    #[error("concurrent update conflict")]
    Conflict,

    #[error("Database error")]
    Database(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// A fully validated admission, ready to be committed.
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    pub registration_id: RegistrationId,
    pub event_id: EventId,
    /// Revision of the snapshot the request was validated against.
    pub expected_revision: u64,
    pub user_id: UserId,
    pub kind: AdmissionKind,
    pub attendee: AttendeeInfo,
    pub ticket_type: String,
}

#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Authoritative read of an event and its counters.
    async fn load_event(&self, event_id: &EventId) -> Result<Option<Event>, StoreError>;

    /// Conditional event update used by the event collaborator.
    ///
    /// Inserts the event when it does not exist yet. Otherwise the update only
    /// applies if the stored revision equals `event.revision`; the stored
    /// revision is then bumped. Attendance counters are always kept from the
    /// store, never taken from `event`.
    async fn save_event(&self, event: Event) -> Result<Event, StoreError>;

    /// Checks and commits one admission atomically, assigning `registeredAt`.
    async fn commit_admission(&self, request: AdmissionRequest)
        -> Result<Registration, StoreError>;

    async fn registration(
        &self,
        event_id: &EventId,
        registration_id: &RegistrationId,
    ) -> Result<Option<Registration>, StoreError>;

    /// Ledger entries of one event in commit order.
    async fn registrations_for_event(
        &self,
        event_id: &EventId,
    ) -> Result<Vec<Registration>, StoreError>;

    async fn registrations_for_user(&self, user_id: &UserId)
        -> Result<Vec<Registration>, StoreError>;

    async fn prior_admissions(
        &self,
        event_id: &EventId,
        user_id: &UserId,
    ) -> Result<PriorAdmissions, StoreError>;
}

/// Merges the caller's edits into the stored event, keeping stored counters.
///
/// `detached` holds the counters of programs removed by earlier edits; a
/// program that comes back under the same id resumes from its old count.
pub(crate) fn merge_event_edit(
    stored: &Event,
    mut edit: Event,
    detached: &HashMap<ProgramId, u32>,
) -> Result<Event, StoreError> {
    if edit.revision != stored.revision {
        return Err(StoreError::Conflict);
    }
    ensure_unique_programs(&edit)?;

    edit.current_attendees = stored.current_attendees;
    if let Some(capacity) = edit.capacity {
        if capacity < stored.current_attendees {
            return Err(AdmissionError::validation(format!(
                "capacity {capacity} is below the {} registered attendee(s)",
                stored.current_attendees
            ))
            .into());
        }
    }

    for program in &mut edit.programs {
        program.current_attendees = stored
            .program(&program.id)
            .map(|p| p.current_attendees)
            .or_else(|| detached.get(&program.id).copied())
            .unwrap_or(0);
        if let Some(capacity) = program.capacity {
            if capacity < program.current_attendees {
                return Err(AdmissionError::validation(format!(
                    "program '{}' capacity {capacity} is below its {} registration(s)",
                    program.title, program.current_attendees
                ))
                .into());
            }
        }
    }

    edit.revision = stored.revision + 1;
    Ok(edit)
}

/// A brand-new event starts with empty counters.
pub(crate) fn fresh_event(mut event: Event) -> Result<Event, StoreError> {
    ensure_unique_programs(&event)?;
    event.current_attendees = 0;
    event.revision = 0;
    for program in &mut event.programs {
        program.current_attendees = 0;
    }
    Ok(event)
}

fn ensure_unique_programs(event: &Event) -> Result<(), StoreError> {
    let mut seen = HashSet::with_capacity(event.programs.len());
    match event.programs.iter().find(|p| !seen.insert(p.id)) {
        Some(duplicate) => Err(AdmissionError::validation(format!(
            "program {} appears more than once",
            duplicate.id
        ))
        .into()),
        None => Ok(()),
    }
}
