//! Core data model: sessions, message records and related rows.

mod message;
mod session;

pub use message::{
    Chat, Contact, MediaFile, MessageDirection, MessageKind, MessageRecord, MessageStatus,
};
pub use session::{
    valid_session_name, Session, SessionFilters, SessionStatus, SubPhase, NAME_MAX_LEN,
    NAME_MIN_LEN,
};
