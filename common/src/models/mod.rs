//! Shared data models.

pub mod document;
pub mod session;

// Re-export commonly used types
pub use document::{DeleteOutcome, DocumentId, DocumentView, UpdateOutcome};
pub use session::{
    ConnectRequest, ConnectResponse, DisconnectResponse, NameRequest, SessionStage,
    SessionStatus, UserId,
};
