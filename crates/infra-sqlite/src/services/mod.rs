// Collaborators
//
// Thin use-case layer over the persistence service: run the operation, then
// tell observers which topic changed.

mod favorites_service;
mod schedule_service;

pub use favorites_service::FavoritesService;
pub use schedule_service::{ImportSummary, ScheduleService};
