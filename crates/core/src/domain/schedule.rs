// Schedule Feed Snapshot

use super::{DomainError, Event, Track};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One full snapshot of the conference programme, as delivered by the feed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl Schedule {
    /// Reject snapshots that cannot be stored consistently
    pub fn validate(&self) -> Result<(), DomainError> {
        let mut track_names = HashSet::new();
        for track in &self.tracks {
            if track.name.trim().is_empty() {
                return Err(DomainError::ValidationError(
                    "track name must not be empty".to_string(),
                ));
            }
            if !track_names.insert(track.name.as_str()) {
                return Err(DomainError::DuplicateTrack(track.name.clone()));
            }
        }

        let mut event_ids = HashSet::new();
        for event in &self.events {
            if !event_ids.insert(event.id) {
                return Err(DomainError::DuplicateEvent(event.id));
            }
            if event.duration_minutes < 0 {
                return Err(DomainError::ValidationError(format!(
                    "event {} has negative duration {}",
                    event.id, event.duration_minutes
                )));
            }
            if !track_names.contains(event.track.as_str()) {
                return Err(DomainError::UnknownTrack {
                    event_id: event.id,
                    track: event.track.clone(),
                });
            }
        }

        Ok(())
    }
}
