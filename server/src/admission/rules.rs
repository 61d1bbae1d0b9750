//! Ordered admission checks, evaluated by a store inside its atomic section.
//!
//! Nothing in here touches storage: a backend locks the event, gathers the
//! caller's prior admissions for it, calls [`evaluate`], and applies the returned
//! [`AdmissionEffects`] in the same transaction. The order of the checks is the
//! order in which rejections are reported.

use std::collections::BTreeSet;

use super::error::AdmissionError;
use crate::models::{Event, ProgramId, RegistrationScope};

/// What the requesting user already holds for one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorAdmissions {
    pub event_level: bool,
    pub programs: BTreeSet<ProgramId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionKind {
    Event {
        quantity: u32,
        program_ids: BTreeSet<ProgramId>,
    },
    Program {
        program_id: ProgramId,
    },
}

impl AdmissionKind {
    pub fn scope(&self) -> RegistrationScope {
        match self {
            Self::Event { .. } => RegistrationScope::Event,
            Self::Program { .. } => RegistrationScope::Program,
        }
    }

    pub fn quantity(&self) -> u32 {
        match self {
            Self::Event { quantity, .. } => *quantity,
            Self::Program { .. } => 1,
        }
    }

    pub fn program_ids(&self) -> BTreeSet<ProgramId> {
        match self {
            Self::Event { program_ids, .. } => program_ids.clone(),
            Self::Program { program_id } => BTreeSet::from([*program_id]),
        }
    }
}

/// Counter changes implied by an accepted admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionEffects {
    pub event_attendees: u32,
    pub programs: Vec<ProgramId>,
}

/// Checks that come before the attendee policy and only depend on event state.
pub fn precheck(event: &Event, kind: &AdmissionKind) -> Result<(), AdmissionError> {
    match kind {
        AdmissionKind::Event { .. } => {
            if !event.is_open_for_registration() {
                return Err(AdmissionError::RegistrationClosed {
                    event_id: event.id,
                    status: event.status,
                });
            }
        }
        AdmissionKind::Program { program_id } => check_program_available(event, program_id)?,
    }
    Ok(())
}

pub fn evaluate(
    event: &Event,
    prior: &PriorAdmissions,
    kind: &AdmissionKind,
) -> Result<AdmissionEffects, AdmissionError> {
    precheck(event, kind)?;

    match kind {
        AdmissionKind::Event {
            quantity,
            program_ids,
        } => {
            if !event.has_room_for(*quantity) {
                return Err(AdmissionError::CapacityExceeded {
                    event_id: event.id,
                    requested: *quantity,
                    remaining: event
                        .capacity
                        .map_or(u32::MAX, |c| c.saturating_sub(event.current_attendees)),
                });
            }
            if prior.event_level {
                return Err(AdmissionError::AlreadyRegistered {
                    event_id: event.id,
                    program_id: None,
                });
            }
            for program_id in program_ids {
                check_program_available(event, program_id)?;
                check_program_seat(event, prior, program_id)?;
            }
            Ok(AdmissionEffects {
                event_attendees: *quantity,
                programs: program_ids.iter().copied().collect(),
            })
        }
        AdmissionKind::Program { program_id } => {
            check_program_seat(event, prior, program_id)?;
            Ok(AdmissionEffects {
                event_attendees: 0,
                programs: vec![*program_id],
            })
        }
    }
}

/// Applies accepted effects to an in-memory event. Callers must have obtained
/// `effects` from [`evaluate`] against the same state.
pub fn apply(event: &mut Event, effects: &AdmissionEffects) {
    event.current_attendees = event
        .current_attendees
        .saturating_add(effects.event_attendees);
    for program_id in &effects.programs {
        if let Some(program) = event.program_mut(program_id) {
            program.current_attendees = program.current_attendees.saturating_add(1);
        }
    }
}

fn check_program_available(event: &Event, program_id: &ProgramId) -> Result<(), AdmissionError> {
    match event.program(program_id) {
        Some(program) if program.requires_registration => Ok(()),
        _ => Err(AdmissionError::ProgramUnavailable {
            program_id: *program_id,
        }),
    }
}

fn check_program_seat(
    event: &Event,
    prior: &PriorAdmissions,
    program_id: &ProgramId,
) -> Result<(), AdmissionError> {
    let full = event.program(program_id).map_or(true, |p| p.is_full());
    if full {
        return Err(AdmissionError::ProgramFull {
            program_id: *program_id,
        });
    }
    if prior.programs.contains(program_id) {
        return Err(AdmissionError::AlreadyRegistered {
            event_id: event.id,
            program_id: Some(*program_id),
        });
    }
    Ok(())
}
