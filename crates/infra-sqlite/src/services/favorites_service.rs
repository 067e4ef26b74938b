// Favorites Use Cases

use crate::error::PersistenceError;
use crate::operations::{
    AddFavoriteEvent, AddFavoriteTrack, FavoriteEventIds, FavoriteEvents, FavoriteTrackNames,
    IsFavoriteEvent, IsFavoriteTrack, RemoveFavoriteEvent, RemoveFavoriteTrack,
};
use crate::service::PersistenceService;
use fosdem_core::domain::{Event, EventId, TrackName};
use fosdem_core::port::TimeProvider;
use fosdem_core::{NotificationHub, Topic};
use std::sync::Arc;
use tracing::debug;

/// Favorite tracks and events; publishes [`Topic::FavoriteTracks`] and
/// [`Topic::FavoriteEvents`] after every successful change
#[derive(Clone)]
pub struct FavoritesService {
    persistence: Arc<PersistenceService>,
    hub: NotificationHub,
    clock: Arc<dyn TimeProvider>,
}

impl FavoritesService {
    pub fn new(
        persistence: Arc<PersistenceService>,
        hub: NotificationHub,
        clock: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            persistence,
            hub,
            clock,
        }
    }

    pub async fn add_track(&self, name: impl Into<TrackName>) -> Result<(), PersistenceError> {
        let op = AddFavoriteTrack::new(name, self.clock.now_millis());
        debug!(track = %op.name, "Adding favorite track");
        self.persistence.perform_write(op).await?;
        self.hub.publish(&Topic::FavoriteTracks);
        Ok(())
    }

    pub async fn remove_track(&self, name: impl Into<TrackName>) -> Result<(), PersistenceError> {
        let op = RemoveFavoriteTrack::new(name);
        debug!(track = %op.name, "Removing favorite track");
        self.persistence.perform_write(op).await?;
        self.hub.publish(&Topic::FavoriteTracks);
        Ok(())
    }

    pub async fn contains_track(&self, name: impl Into<TrackName>) -> Result<bool, PersistenceError> {
        self.persistence.perform_read(IsFavoriteTrack::new(name)).await
    }

    pub async fn track_names(&self) -> Result<Vec<TrackName>, PersistenceError> {
        self.persistence.perform_read(FavoriteTrackNames).await
    }

    pub async fn add_event(&self, id: EventId) -> Result<(), PersistenceError> {
        debug!(event = id, "Adding favorite event");
        self.persistence
            .perform_write(AddFavoriteEvent {
                id,
                added_at: self.clock.now_millis(),
            })
            .await?;
        self.hub.publish(&Topic::FavoriteEvents);
        Ok(())
    }

    pub async fn remove_event(&self, id: EventId) -> Result<(), PersistenceError> {
        debug!(event = id, "Removing favorite event");
        self.persistence.perform_write(RemoveFavoriteEvent { id }).await?;
        self.hub.publish(&Topic::FavoriteEvents);
        Ok(())
    }

    pub async fn contains_event(&self, id: EventId) -> Result<bool, PersistenceError> {
        self.persistence.perform_read(IsFavoriteEvent { id }).await
    }

    pub async fn event_ids(&self) -> Result<Vec<EventId>, PersistenceError> {
        self.persistence.perform_read(FavoriteEventIds).await
    }

    /// Favorite events present in the current schedule
    pub async fn events(&self) -> Result<Vec<Event>, PersistenceError> {
        self.persistence.perform_read(FavoriteEvents).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::test_support::memory_store;
    use fosdem_core::port::FixedTimeProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn favorites() -> (FavoritesService, NotificationHub) {
        let hub = NotificationHub::new();
        let service = FavoritesService::new(
            Arc::new(memory_store().await),
            hub.clone(),
            Arc::new(FixedTimeProvider(1_700_000_000_000)),
        );
        (service, hub)
    }

    #[tokio::test]
    async fn test_track_changes_are_published() {
        let (favorites, hub) = favorites().await;
        let published = Arc::new(AtomicUsize::new(0));
        let counter = published.clone();
        let _subscription = hub.subscribe(Topic::FavoriteTracks, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        favorites.add_track("Rust").await.unwrap();
        assert!(favorites.contains_track("Rust").await.unwrap());
        favorites.remove_track("Rust").await.unwrap();

        assert_eq!(published.load(Ordering::SeqCst), 2);
        assert!(favorites.track_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_publishes_nothing() {
        let (favorites, hub) = favorites().await;
        let published = Arc::new(AtomicUsize::new(0));
        let counter = published.clone();
        let _subscription = hub.subscribe(Topic::FavoriteTracks, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(favorites.add_track("").await.is_err());
        assert_eq!(published.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_event_changes_use_their_own_topic() {
        let (favorites, hub) = favorites().await;
        let tracks = Arc::new(AtomicUsize::new(0));
        let events = Arc::new(AtomicUsize::new(0));
        let (t, e) = (tracks.clone(), events.clone());
        let _tracks = hub.subscribe(Topic::FavoriteTracks, move || {
            t.fetch_add(1, Ordering::SeqCst);
        });
        let _events = hub.subscribe(Topic::FavoriteEvents, move || {
            e.fetch_add(1, Ordering::SeqCst);
        });

        favorites.add_event(7).await.unwrap();
        assert!(favorites.contains_event(7).await.unwrap());
        assert_eq!(favorites.event_ids().await.unwrap(), vec![7]);

        assert_eq!(events.load(Ordering::SeqCst), 1);
        assert_eq!(tracks.load(Ordering::SeqCst), 0);
        // Event 7 is not in the (empty) schedule
        assert!(favorites.events().await.unwrap().is_empty());
    }
}
