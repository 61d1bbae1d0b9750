//! Resolves the two ids embedded in a registration QR code.
//!
//! The lookup is unauthenticated: knowing `(event_id, registration_id)` is
//! enough to read the attendee's name and email. Program titles come from
//! the event's current program list, so renamed programs show their new title
//! and removed programs are left out.

use serde::Serialize;
use std::sync::Arc;

use crate::admission::error::{AdmissionError, Missing};
use crate::models::{EventId, RegistrationId};
use crate::store::RegistrationStore;
use crate::utils::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub attendee_display_name: Option<String>,
    pub attendee_email: Option<String>,
    pub event_title: String,
    pub registered_program_titles: Vec<String>,
}

/// Path the QR collaborator encodes for a registration.
pub fn verification_path(event_id: &EventId, registration_id: &RegistrationId) -> String {
    format!("/verify/{event_id}/{registration_id}")
}

#[derive(Clone)]
pub struct Verifier {
    store: Arc<dyn RegistrationStore>,
}

impl Verifier {
    pub fn new(store: Arc<dyn RegistrationStore>) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self), fields(event_id = %event_id, registration_id = %registration_id))]
    pub async fn verify(
        &self,
        event_id: &EventId,
        registration_id: &RegistrationId,
    ) -> Result<Verification, AppError> {
        let not_found = || AdmissionError::NotFound(Missing::Registration(*event_id, *registration_id));

        let registration = self
            .store
            .registration(event_id, registration_id)
            .await?
            .ok_or_else(not_found)?;
        let event = self
            .store
            .load_event(event_id)
            .await?
            .ok_or_else(|| AdmissionError::NotFound(Missing::Event(*event_id)))?;

        let registered_program_titles = event
            .programs
            .iter()
            .filter(|program| registration.covers_program(&program.id))
            .map(|program| program.title.clone())
            .collect();

        Ok(Verification {
            attendee_display_name: registration.attendee.display_name,
            attendee_email: registration.attendee.email,
            event_title: event.title,
            registered_program_titles,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_path_shape() {
        let event_id = EventId::new();
        let registration_id = RegistrationId::new();
        let path = verification_path(&event_id, &registration_id);
        let event = event_id.to_string();
        let registration = registration_id.to_string();
        let segments: Vec<&str> = path.split('/').collect();
        assert_eq!(segments, vec!["", "verify", event.as_str(), registration.as_str()]);
    }
}
