// Schedule Import
//
// Replaces the whole programme in one write. The write runs inside the pool's
// transaction, so readers see either the old schedule or the new one.

use crate::error::OperationError;
use crate::operation::Write;
use async_trait::async_trait;
use chrono::Timelike;
use fosdem_core::domain::Schedule;
use sqlx::SqliteConnection;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ImportSchedule {
    pub schedule: Schedule,
}

impl ImportSchedule {
    pub fn new(schedule: Schedule) -> Self {
        Self { schedule }
    }
}

#[async_trait]
impl Write for ImportSchedule {
    async fn perform(&self, writer: &mut SqliteConnection) -> Result<(), OperationError> {
        self.schedule.validate()?;

        // Children first; favorites are left alone
        for table in ["attachments", "links", "event_people", "events", "people", "tracks"] {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *writer)
                .await?;
        }

        for track in &self.schedule.tracks {
            sqlx::query("INSERT INTO tracks (name, day) VALUES (?, ?)")
                .bind(&track.name)
                .bind(track.day)
                .execute(&mut *writer)
                .await?;
        }

        for event in &self.schedule.events {
            sqlx::query(
                r#"
                INSERT INTO events (
                    id, room, track, title, subtitle, summary, abstract,
                    date, start, duration_minutes
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(event.id)
            .bind(&event.room)
            .bind(&event.track)
            .bind(&event.title)
            .bind(&event.subtitle)
            .bind(&event.summary)
            .bind(&event.abstract_text)
            .bind(event.date.timestamp_millis())
            .bind(i64::from(event.start.num_seconds_from_midnight()))
            .bind(event.duration_minutes)
            .execute(&mut *writer)
            .await?;

            for (position, person) in event.people.iter().enumerate() {
                // The same speaker appears on many events; the last spelling wins
                sqlx::query(
                    "INSERT INTO people (id, name) VALUES (?, ?) ON CONFLICT(id) DO UPDATE SET name = excluded.name",
                )
                .bind(person.id)
                .bind(&person.name)
                .execute(&mut *writer)
                .await?;

                sqlx::query(
                    "INSERT INTO event_people (event_id, person_id, position) VALUES (?, ?, ?) ON CONFLICT DO NOTHING",
                )
                .bind(event.id)
                .bind(person.id)
                .bind(position as i64)
                .execute(&mut *writer)
                .await?;
            }

            for (position, link) in event.links.iter().enumerate() {
                sqlx::query("INSERT INTO links (event_id, position, name, url) VALUES (?, ?, ?, ?)")
                    .bind(event.id)
                    .bind(position as i64)
                    .bind(&link.name)
                    .bind(&link.url)
                    .execute(&mut *writer)
                    .await?;
            }

            for (position, attachment) in event.attachments.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO attachments (event_id, position, name, url, type) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(event.id)
                .bind(position as i64)
                .bind(&attachment.name)
                .bind(&attachment.url)
                .bind(&attachment.kind)
                .execute(&mut *writer)
                .await?;
            }
        }

        info!(
            tracks = self.schedule.tracks.len(),
            events = self.schedule.events.len(),
            "Schedule imported"
        );
        Ok(())
    }
}
