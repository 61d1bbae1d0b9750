use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
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

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Stable program identifier, assigned once when the program is created.
///
/// Registrations reference programs through this id so that reordering or
/// removing entries in [`Event::programs`] never remaps a past registration
/// onto a different program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgramId(Uuid);

impl ProgramId {
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

impl Default for ProgramId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Draft,
    Published,
    Cancelled,
    Completed,
}

impl EventStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown event status '{other}'")),
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl FromStr for Visibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(format!("unknown visibility '{other}'")),
        }
    }
}

/// A scheduled slot inside an event. Programs only live as part of their event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub id: ProgramId,
    pub date_time: Option<DateTime<Utc>>,
    pub title: String,
    pub description: Option<String>,
    pub requires_registration: bool,
    pub capacity: Option<u32>,
    pub current_attendees: u32,
}

impl Program {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: ProgramId::new(),
            date_time: None,
            title: title.into(),
            description: None,
            requires_registration: true,
            capacity: None,
            current_attendees: 0,
        }
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn open_seating(mut self) -> Self {
        self.requires_registration = false;
        self
    }

    pub fn is_full(&self) -> bool {
        matches!(self.capacity, Some(capacity) if self.current_attendees >= capacity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub organizer_id: String,
    pub title: String,
    pub category: Option<String>,
    pub status: EventStatus,
    pub visibility: Visibility,
    pub capacity: Option<u32>,
    pub current_attendees: u32,
    pub programs: Vec<Program>,
    /// Edit counter. Admissions never bump it; event edits always do.
    pub revision: u64,
}

impl Event {
    pub fn new(organizer_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: EventId::new(),
            organizer_id: organizer_id.into(),
            title: title.into(),
            category: None,
            status: EventStatus::Draft,
            visibility: Visibility::Public,
            capacity: None,
            current_attendees: 0,
            programs: Vec::new(),
            revision: 0,
        }
    }

    pub fn published(mut self) -> Self {
        self.status = EventStatus::Published;
        self
    }

    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_program(mut self, program: Program) -> Self {
        self.programs.push(program);
        self
    }

    /// Published events accept registrations. Both visibilities are registrable;
    /// private events are only hidden from listings.
    pub fn is_open_for_registration(&self) -> bool {
        self.status == EventStatus::Published
            && matches!(self.visibility, Visibility::Public | Visibility::Private)
    }

    pub fn has_room_for(&self, quantity: u32) -> bool {
        match self.capacity {
            None => true,
            Some(capacity) => u64::from(self.current_attendees) + u64::from(quantity)
                <= u64::from(capacity),
        }
    }

    pub fn program(&self, id: &ProgramId) -> Option<&Program> {
        self.programs.iter().find(|p| &p.id == id)
    }

    pub fn program_mut(&mut self, id: &ProgramId) -> Option<&mut Program> {
        self.programs.iter_mut().find(|p| &p.id == id)
    }

    /// Only the two spellings the registration form recognises.
    pub fn is_sports(&self) -> bool {
        matches!(self.category.as_deref(), Some("Sports" | "sports"))
    }
}
