//! Read-only views over the registration ledger.
//!
//! These are served straight from the store's read paths and are never used
//! to decide an admission.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::admission::error::{AdmissionError, Missing};
use crate::models::{Event, EventId, ProgramId, Registration, UserId};
use crate::store::RegistrationStore;
use crate::utils::error::AppError;

#[derive(Clone)]
pub struct RegistrationQueries {
    store: Arc<dyn RegistrationStore>,
}

impl RegistrationQueries {
    pub fn new(store: Arc<dyn RegistrationStore>) -> Self {
        Self { store }
    }

    pub async fn event(&self, event_id: &EventId) -> Result<Event, AppError> {
        self.store
            .load_event(event_id)
            .await?
            .ok_or_else(|| AdmissionError::NotFound(Missing::Event(*event_id)).into())
    }

    /// Organizer roster, oldest registration first.
    pub async fn registrations_for_event(
        &self,
        event_id: &EventId,
    ) -> Result<Vec<Registration>, AppError> {
        let mut registrations = self.store.registrations_for_event(event_id).await?;
        // Stable: commit order breaks ties between equal timestamps.
        registrations.sort_by_key(|r| r.registered_at);
        Ok(registrations)
    }

    pub async fn registrations_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Registration>, AppError> {
        Ok(self.store.registrations_for_user(user_id).await?)
    }

    pub async fn is_registered(
        &self,
        event_id: &EventId,
        user_id: &UserId,
    ) -> Result<bool, AppError> {
        Ok(self
            .store
            .prior_admissions(event_id, user_id)
            .await?
            .event_level)
    }

    pub async fn is_registered_for_program(
        &self,
        event_id: &EventId,
        program_id: &ProgramId,
        user_id: &UserId,
    ) -> Result<bool, AppError> {
        Ok(self
            .store
            .prior_admissions(event_id, user_id)
            .await?
            .programs
            .contains(program_id))
    }

    /// Every program the user holds a seat in for this event, whichever
    /// registration granted it.
    pub async fn registered_program_ids(
        &self,
        event_id: &EventId,
        user_id: &UserId,
    ) -> Result<BTreeSet<ProgramId>, AppError> {
        Ok(self
            .store
            .prior_admissions(event_id, user_id)
            .await?
            .programs)
    }
}
