// Domain Layer - Conference schedule records

pub mod error;
pub mod event;
pub mod schedule;
pub mod track;

// Re-exports
pub use error::DomainError;
pub use event::{Attachment, Event, EventId, Link, Person, PersonId};
pub use schedule::Schedule;
pub use track::{tracks_by_day, Track, TrackName};
