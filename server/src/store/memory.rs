//! In-process backend. One write lock covers check-and-commit, which makes
//! every admission serializable against every other one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{fresh_event, merge_event_edit, AdmissionRequest, RegistrationStore, StoreError};
use crate::admission::error::{AdmissionError, Missing};
use crate::admission::rules::{self, PriorAdmissions};
use crate::models::{
    Event, EventId, PaymentStatus, ProgramId, Registration, RegistrationId, UserId,
};

#[derive(Debug)]
struct EventEntry {
    event: Event,
    ledger: Vec<Registration>,
    positions: HashMap<RegistrationId, usize>,
    holders: HashMap<UserId, PriorAdmissions>,
    /// Counters of programs removed from the event, kept for re-attachment.
    detached: HashMap<ProgramId, u32>,
    last_registered_at: Option<DateTime<Utc>>,
}

impl EventEntry {
    fn new(event: Event) -> Self {
        Self {
            event,
            ledger: Vec::new(),
            positions: HashMap::new(),
            holders: HashMap::new(),
            detached: HashMap::new(),
            last_registered_at: None,
        }
    }

    fn apply_edit(&mut self, merged: Event) {
        for program in &self.event.programs {
            if merged.program(&program.id).is_none() {
                self.detached.insert(program.id, program.current_attendees);
            }
        }
        for program in &merged.programs {
            self.detached.remove(&program.id);
        }
        self.event = merged;
    }

    /// Commit time, clamped so that it never runs backwards within the event.
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let at = match self.last_registered_at {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_registered_at = Some(at);
        at
    }
}

#[derive(Debug, Default)]
struct Inner {
    events: HashMap<EventId, EventEntry>,
    by_user: HashMap<UserId, Vec<(EventId, RegistrationId)>>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistrationStore for MemoryStore {
    async fn load_event(&self, event_id: &EventId) -> Result<Option<Event>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.events.get(event_id).map(|entry| entry.event.clone()))
    }

    async fn save_event(&self, event: Event) -> Result<Event, StoreError> {
        let mut inner = self.inner.write().await;
        match inner.events.get_mut(&event.id) {
            Some(entry) => {
                let merged = merge_event_edit(&entry.event, event, &entry.detached)?;
                entry.apply_edit(merged.clone());
                Ok(merged)
            }
            None => {
                let event = fresh_event(event)?;
                inner.events.insert(event.id, EventEntry::new(event.clone()));
                Ok(event)
            }
        }
    }

    async fn commit_admission(
        &self,
        request: AdmissionRequest,
    ) -> Result<Registration, StoreError> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        let entry = inner
            .events
            .get_mut(&request.event_id)
            .ok_or(AdmissionError::NotFound(Missing::Event(request.event_id)))?;
        if entry.event.revision != request.expected_revision {
            return Err(StoreError::Conflict);
        }

        let prior = entry
            .holders
            .get(&request.user_id)
            .cloned()
            .unwrap_or_default();
        let effects = rules::evaluate(&entry.event, &prior, &request.kind)?;
        rules::apply(&mut entry.event, &effects);

        let registration = Registration {
            id: request.registration_id,
            event_id: request.event_id,
            user_id: request.user_id,
            scope: request.kind.scope(),
            program_ids: request.kind.program_ids(),
            attendee: request.attendee,
            ticket_type: request.ticket_type,
            quantity: request.kind.quantity(),
            total_amount: Decimal::ZERO,
            payment_status: PaymentStatus::Completed,
            check_in_status: false,
            registered_at: entry.next_timestamp(),
        };

        let held = entry.holders.entry(registration.user_id.clone()).or_default();
        held.event_level |= registration.is_event_level();
        held.programs.extend(registration.program_ids.iter().copied());

        entry.positions.insert(registration.id, entry.ledger.len());
        entry.ledger.push(registration.clone());
        inner
            .by_user
            .entry(registration.user_id.clone())
            .or_default()
            .push((registration.event_id, registration.id));

        Ok(registration)
    }

    async fn registration(
        &self,
        event_id: &EventId,
        registration_id: &RegistrationId,
    ) -> Result<Option<Registration>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.events.get(event_id).and_then(|entry| {
            entry
                .positions
                .get(registration_id)
                .and_then(|&pos| entry.ledger.get(pos))
                .cloned()
        }))
    }

    async fn registrations_for_event(
        &self,
        event_id: &EventId,
    ) -> Result<Vec<Registration>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .events
            .get(event_id)
            .map(|entry| entry.ledger.clone())
            .unwrap_or_default())
    }

    async fn registrations_for_user(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<Registration>, StoreError> {
        let inner = self.inner.read().await;
        let Some(keys) = inner.by_user.get(user_id) else {
            return Ok(Vec::new());
        };

        let mut found = Vec::with_capacity(keys.len());
        for (event_id, registration_id) in keys {
            let registration = inner.events.get(event_id).and_then(|entry| {
                entry
                    .positions
                    .get(registration_id)
                    .and_then(|&pos| entry.ledger.get(pos))
            });
            match registration {
                Some(registration) => found.push(registration.clone()),
                None => {
                    return Err(StoreError::Corrupt(format!(
                        "user index points at missing registration {registration_id}"
                    )))
                }
            }
        }
        Ok(found)
    }

    async fn prior_admissions(
        &self,
        event_id: &EventId,
        user_id: &UserId,
    ) -> Result<PriorAdmissions, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .events
            .get(event_id)
            .and_then(|entry| entry.holders.get(user_id))
            .cloned()
            .unwrap_or_default())
    }
}
