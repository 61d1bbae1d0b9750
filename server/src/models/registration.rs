use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use super::event::{EventId, ProgramId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistrationId(Uuid);

impl RegistrationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RegistrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque identity handed over by the authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationScope {
    /// Created by an event registration; counts against event capacity.
    Event,
    /// Created by a single-program registration; never counts against event capacity.
    Program,
}

impl RegistrationScope {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Program => "program",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Completed,
}

impl PaymentStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
        }
    }
}

/// Attendee-supplied contact fields. All optional; see
/// [`AttendeePolicy`](crate::admission::policy::AttendeePolicy) for requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendeeInfo {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(rename = "class")]
    pub class_name: Option<String>,
    pub section: Option<String>,
    pub branch: Option<String>,
}

impl AttendeeInfo {
    /// Trims every field and drops the ones left empty.
    pub fn normalized(self) -> Self {
        fn clean(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }

        Self {
            display_name: clean(self.display_name),
            email: clean(self.email),
            phone: clean(self.phone),
            class_name: clean(self.class_name),
            section: clean(self.section),
            branch: clean(self.branch),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: RegistrationId,
    pub event_id: EventId,
    pub user_id: UserId,
    pub scope: RegistrationScope,
    pub program_ids: BTreeSet<ProgramId>,
    #[serde(flatten)]
    pub attendee: AttendeeInfo,
    pub ticket_type: String,
    pub quantity: u32,
    pub total_amount: Decimal,
    pub payment_status: PaymentStatus,
    /// Set by the check-in collaborator at the door; always false at admission.
    #[serde(default)]
    pub check_in_status: bool,
    pub registered_at: DateTime<Utc>,
}

impl Registration {
    pub fn is_event_level(&self) -> bool {
        self.scope == RegistrationScope::Event
    }

    pub fn covers_program(&self, program_id: &ProgramId) -> bool {
        self.program_ids.contains(program_id)
    }
}
