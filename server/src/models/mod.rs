pub mod event;
pub mod registration;

pub use event::{Event, EventId, EventStatus, Program, ProgramId, Visibility};
pub use registration::{
    AttendeeInfo, PaymentStatus, Registration, RegistrationId, RegistrationScope, UserId,
};
