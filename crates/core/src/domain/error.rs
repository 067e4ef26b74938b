// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Duplicate track in schedule: {0}")]
    DuplicateTrack(String),

    #[error("Duplicate event in schedule: {0}")]
    DuplicateEvent(i64),

    #[error("Event {event_id} references unknown track {track}")]
    UnknownTrack { event_id: i64, track: String },

    #[error("Validation error: {0}")]
    ValidationError(String),
}
