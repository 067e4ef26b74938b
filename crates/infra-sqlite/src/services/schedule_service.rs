// Schedule Use Cases

use crate::error::PersistenceError;
use crate::operations::{
    AllTracks, EventsForIdentifiers, EventsForSearch, EventsForTrack, EventsLiveAt, ImportSchedule,
};
use crate::service::PersistenceService;
use chrono::{DateTime, Utc};
use fosdem_core::domain::{Event, EventId, Schedule, Track, TrackName};
use fosdem_core::{NotificationHub, Topic};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub tracks: usize,
    pub events: usize,
}

/// Programme import and lookups; publishes [`Topic::Tracks`] and
/// [`Topic::Events`] after an import
#[derive(Clone)]
pub struct ScheduleService {
    persistence: Arc<PersistenceService>,
    hub: NotificationHub,
}

impl ScheduleService {
    pub fn new(persistence: Arc<PersistenceService>, hub: NotificationHub) -> Self {
        Self { persistence, hub }
    }

    /// Replace the stored programme with `schedule`
    pub async fn import(&self, schedule: Schedule) -> Result<ImportSummary, PersistenceError> {
        let summary = ImportSummary {
            tracks: schedule.tracks.len(),
            events: schedule.events.len(),
        };

        self.persistence.perform_write(ImportSchedule::new(schedule)).await?;
        info!(tracks = summary.tracks, events = summary.events, "Schedule updated");

        self.hub.publish(&Topic::Tracks);
        self.hub.publish(&Topic::Events);
        Ok(summary)
    }

    pub async fn tracks(&self) -> Result<Vec<Track>, PersistenceError> {
        self.persistence.perform_read(AllTracks).await
    }

    pub async fn events_for_track(&self, track: impl Into<TrackName>) -> Result<Vec<Event>, PersistenceError> {
        self.persistence.perform_read(EventsForTrack::new(track)).await
    }

    pub async fn search(&self, query: impl Into<String>) -> Result<Vec<Event>, PersistenceError> {
        self.persistence.perform_read(EventsForSearch::new(query)).await
    }

    pub async fn events(&self, ids: impl IntoIterator<Item = EventId>) -> Result<Vec<Event>, PersistenceError> {
        self.persistence.perform_read(EventsForIdentifiers::new(ids)).await
    }

    pub async fn live_at(&self, at: DateTime<Utc>) -> Result<Vec<Event>, PersistenceError> {
        self.persistence.perform_read(EventsLiveAt { at }).await
    }
}
