// Favorite Reads and Writes
//
// Favorites reference tracks and events by identifier only, so they survive a
// schedule re-import. Adding or removing twice is a no-op.

use super::events::load_by_ids;
use crate::error::OperationError;
use crate::operation::{Read, Write};
use async_trait::async_trait;
use fosdem_core::domain::{Event, EventId, TrackName};
use fosdem_core::DomainError;
use sqlx::SqliteConnection;

/// Favorite track names, oldest first
#[derive(Debug, Clone, Copy, Default)]
pub struct FavoriteTrackNames;

#[async_trait]
impl Read for FavoriteTrackNames {
    type Output = Vec<TrackName>;

    async fn perform(&self, snapshot: &mut SqliteConnection) -> Result<Vec<TrackName>, OperationError> {
        let names = sqlx::query_scalar("SELECT name FROM favorite_tracks ORDER BY added_at, rowid")
            .fetch_all(&mut *snapshot)
            .await?;
        Ok(names)
    }
}

/// Favorite event ids, oldest first
#[derive(Debug, Clone, Copy, Default)]
pub struct FavoriteEventIds;

#[async_trait]
impl Read for FavoriteEventIds {
    type Output = Vec<EventId>;

    async fn perform(&self, snapshot: &mut SqliteConnection) -> Result<Vec<EventId>, OperationError> {
        let ids = sqlx::query_scalar("SELECT event_id FROM favorite_events ORDER BY added_at, rowid")
            .fetch_all(&mut *snapshot)
            .await?;
        Ok(ids)
    }
}

/// Favorite events that exist in the current schedule, in favorite order
#[derive(Debug, Clone, Copy, Default)]
pub struct FavoriteEvents;

#[async_trait]
impl Read for FavoriteEvents {
    type Output = Vec<Event>;

    async fn perform(&self, snapshot: &mut SqliteConnection) -> Result<Vec<Event>, OperationError> {
        let ids = FavoriteEventIds.perform(&mut *snapshot).await?;
        load_by_ids(snapshot, &ids).await
    }
}

#[derive(Debug, Clone)]
pub struct IsFavoriteTrack {
    pub name: TrackName,
}

impl IsFavoriteTrack {
    pub fn new(name: impl Into<TrackName>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Read for IsFavoriteTrack {
    type Output = bool;

    async fn perform(&self, snapshot: &mut SqliteConnection) -> Result<bool, OperationError> {
        let found: i64 =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM favorite_tracks WHERE name = ?)")
                .bind(&self.name)
                .fetch_one(&mut *snapshot)
                .await?;
        Ok(found != 0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IsFavoriteEvent {
    pub id: EventId,
}

#[async_trait]
impl Read for IsFavoriteEvent {
    type Output = bool;

    async fn perform(&self, snapshot: &mut SqliteConnection) -> Result<bool, OperationError> {
        let found: i64 =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM favorite_events WHERE event_id = ?)")
                .bind(self.id)
                .fetch_one(&mut *snapshot)
                .await?;
        Ok(found != 0)
    }
}

#[derive(Debug, Clone)]
pub struct AddFavoriteTrack {
    pub name: TrackName,
    /// Unix millis
    pub added_at: i64,
}

impl AddFavoriteTrack {
    pub fn new(name: impl Into<TrackName>, added_at: i64) -> Self {
        Self {
            name: name.into(),
            added_at,
        }
    }
}

#[async_trait]
impl Write for AddFavoriteTrack {
    async fn perform(&self, writer: &mut SqliteConnection) -> Result<(), OperationError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::ValidationError("track name must not be empty".to_string()).into());
        }

        sqlx::query(
            "INSERT INTO favorite_tracks (name, added_at) VALUES (?, ?) ON CONFLICT(name) DO NOTHING",
        )
        .bind(&self.name)
        .bind(self.added_at)
        .execute(&mut *writer)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RemoveFavoriteTrack {
    pub name: TrackName,
}

impl RemoveFavoriteTrack {
    pub fn new(name: impl Into<TrackName>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Write for RemoveFavoriteTrack {
    async fn perform(&self, writer: &mut SqliteConnection) -> Result<(), OperationError> {
        sqlx::query("DELETE FROM favorite_tracks WHERE name = ?")
            .bind(&self.name)
            .execute(&mut *writer)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AddFavoriteEvent {
    pub id: EventId,
    /// Unix millis
    pub added_at: i64,
}

#[async_trait]
impl Write for AddFavoriteEvent {
    async fn perform(&self, writer: &mut SqliteConnection) -> Result<(), OperationError> {
        sqlx::query(
            "INSERT INTO favorite_events (event_id, added_at) VALUES (?, ?) ON CONFLICT(event_id) DO NOTHING",
        )
        .bind(self.id)
        .bind(self.added_at)
        .execute(&mut *writer)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RemoveFavoriteEvent {
    pub id: EventId,
}

#[async_trait]
impl Write for RemoveFavoriteEvent {
    async fn perform(&self, writer: &mut SqliteConnection) -> Result<(), OperationError> {
        sqlx::query("DELETE FROM favorite_events WHERE event_id = ?")
            .bind(self.id)
            .execute(&mut *writer)
            .await?;
        Ok(())
    }
}
