use std::str::FromStr;
use std::sync::Arc;

use super::error::AdmissionError;
use crate::models::{AttendeeInfo, Event, Visibility};

/// Form-level requirements on attendee fields, checked before any counter is
/// touched. Injected into the controller so event categories with extra fields
/// stay out of the admission rules.
pub trait AttendeePolicy: Send + Sync {
    fn validate(&self, event: &Event, attendee: &AttendeeInfo) -> Result<(), AdmissionError>;
}

/// Accepts any attendee info.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRequirements;

impl AttendeePolicy for NoRequirements {
    fn validate(&self, _event: &Event, _attendee: &AttendeeInfo) -> Result<(), AdmissionError> {
        Ok(())
    }
}

/// The registration form's rules: a phone number always, plus class, section
/// and branch for private sports events.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardPolicy;

impl AttendeePolicy for StandardPolicy {
    fn validate(&self, event: &Event, attendee: &AttendeeInfo) -> Result<(), AdmissionError> {
        let mut missing = Vec::new();
        if attendee.phone.is_none() {
            missing.push("phone");
        }
        if event.visibility == Visibility::Private && event.is_sports() {
            if attendee.class_name.is_none() {
                missing.push("class");
            }
            if attendee.section.is_none() {
                missing.push("section");
            }
            if attendee.branch.is_none() {
                missing.push("branch");
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(AdmissionError::validation(format!(
                "missing required attendee field(s): {}",
                missing.join(", ")
            )))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyKind {
    #[default]
    Standard,
    None,
}

impl PolicyKind {
    pub fn build(self) -> Arc<dyn AttendeePolicy> {
        match self {
            Self::Standard => Arc::new(StandardPolicy),
            Self::None => Arc::new(NoRequirements),
        }
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "none" => Ok(Self::None),
            other => Err(format!("unknown attendee policy '{other}'")),
        }
    }
}
