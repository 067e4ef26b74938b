// Event Reads
//
// Every event read decodes the full record (people, links, attachments) on the
// same snapshot as the event rows themselves.

use crate::error::OperationError;
use crate::operation::Read;
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use fosdem_core::domain::{Attachment, Event, EventId, Link, Person, TrackName};
use sqlx::SqliteConnection;
use std::collections::{HashMap, HashSet};

/// Minimum number of characters before a search query hits the database
pub const MIN_SEARCH_LENGTH: usize = 3;

const EVENT_COLUMNS: &str = "e.id, e.room, e.track, e.title, e.subtitle, e.summary, \
     e.abstract AS abstract_text, e.date, e.start, e.duration_minutes";

/// SQLite row representation of `events`
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EventRow {
    id: i64,
    room: String,
    track: String,
    title: String,
    subtitle: Option<String>,
    summary: Option<String>,
    abstract_text: Option<String>,
    date: i64,
    start: i64,
    duration_minutes: i64,
}

impl EventRow {
    fn into_event(self) -> Result<Event, OperationError> {
        let date = Utc
            .timestamp_millis_opt(self.date)
            .single()
            .ok_or_else(|| {
                OperationError::Decode(format!("event {}: invalid date {}", self.id, self.date))
            })?;
        let start = u32::try_from(self.start)
            .ok()
            .and_then(|secs| NaiveTime::from_num_seconds_from_midnight_opt(secs, 0))
            .ok_or_else(|| {
                OperationError::Decode(format!("event {}: invalid start {}", self.id, self.start))
            })?;

        Ok(Event {
            id: self.id,
            room: self.room,
            track: self.track,
            title: self.title,
            subtitle: self.subtitle,
            summary: self.summary,
            abstract_text: self.abstract_text,
            date,
            start,
            duration_minutes: self.duration_minutes,
            links: Vec::new(),
            people: Vec::new(),
            attachments: Vec::new(),
        })
    }
}

/// Encode a list of ids for `json_each(?)`
fn id_list(ids: &[EventId]) -> Result<String, OperationError> {
    serde_json::to_string(ids).map_err(|e| OperationError::Decode(e.to_string()))
}

/// Decode event rows and attach their people, links and attachments
pub(crate) async fn hydrate(
    conn: &mut SqliteConnection,
    rows: Vec<EventRow>,
) -> Result<Vec<Event>, OperationError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let mut events = rows
        .into_iter()
        .map(EventRow::into_event)
        .collect::<Result<Vec<_>, _>>()?;
    let ids: Vec<EventId> = events.iter().map(|event| event.id).collect();
    let ids = id_list(&ids)?;
    let index: HashMap<EventId, usize> = events
        .iter()
        .enumerate()
        .map(|(i, event)| (event.id, i))
        .collect();

    let people: Vec<(i64, i64, String)> = sqlx::query_as(
        r#"
        SELECT ep.event_id, p.id, p.name
        FROM event_people ep
        JOIN people p ON p.id = ep.person_id
        WHERE ep.event_id IN (SELECT value FROM json_each(?))
        ORDER BY ep.event_id, ep.position
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    for (event_id, id, name) in people {
        if let Some(&i) = index.get(&event_id) {
            events[i].people.push(Person { id, name });
        }
    }

    let links: Vec<(i64, String, Option<String>)> = sqlx::query_as(
        r#"
        SELECT event_id, name, url
        FROM links
        WHERE event_id IN (SELECT value FROM json_each(?))
        ORDER BY event_id, position
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    for (event_id, name, url) in links {
        if let Some(&i) = index.get(&event_id) {
            events[i].links.push(Link { name, url });
        }
    }

    let attachments: Vec<(i64, String, String, Option<String>)> = sqlx::query_as(
        r#"
        SELECT event_id, name, url, type
        FROM attachments
        WHERE event_id IN (SELECT value FROM json_each(?))
        ORDER BY event_id, position
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    for (event_id, name, url, kind) in attachments {
        if let Some(&i) = index.get(&event_id) {
            events[i].attachments.push(Attachment { name, url, kind });
        }
    }

    Ok(events)
}

/// Events with the given ids, in the order the ids were supplied
///
/// Unknown ids are skipped, repeated ids yield the event once.
pub(crate) async fn load_by_ids(
    conn: &mut SqliteConnection,
    ids: &[EventId],
) -> Result<Vec<Event>, OperationError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<EventRow> = sqlx::query_as(&format!(
        "SELECT {EVENT_COLUMNS} FROM events e WHERE e.id IN (SELECT value FROM json_each(?))"
    ))
    .bind(id_list(ids)?)
    .fetch_all(&mut *conn)
    .await?;

    let mut found: HashMap<EventId, Event> = hydrate(conn, rows)
        .await?
        .into_iter()
        .map(|event| (event.id, event))
        .collect();

    let mut seen = HashSet::new();
    Ok(ids
        .iter()
        .filter(|id| seen.insert(**id))
        .filter_map(|id| found.remove(id))
        .collect())
}

/// Escape `LIKE` wildcards so user input matches literally (escape char `\`)
fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// Events of one track, ordered by start
#[derive(Debug, Clone)]
pub struct EventsForTrack {
    pub track: TrackName,
}

impl EventsForTrack {
    pub fn new(track: impl Into<TrackName>) -> Self {
        Self {
            track: track.into(),
        }
    }
}

#[async_trait]
impl Read for EventsForTrack {
    type Output = Vec<Event>;

    async fn perform(&self, snapshot: &mut SqliteConnection) -> Result<Vec<Event>, OperationError> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM events e WHERE e.track = ? ORDER BY e.date, e.start, e.id"
        ))
        .bind(&self.track)
        .fetch_all(&mut *snapshot)
        .await?;

        hydrate(snapshot, rows).await
    }
}

/// Case-insensitive substring search over titles, descriptions, tracks and speakers
#[derive(Debug, Clone)]
pub struct EventsForSearch {
    pub query: String,
}

impl EventsForSearch {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }
}

#[async_trait]
impl Read for EventsForSearch {
    type Output = Vec<Event>;

    async fn perform(&self, snapshot: &mut SqliteConnection) -> Result<Vec<Event>, OperationError> {
        let query = self.query.trim();
        if query.chars().count() < MIN_SEARCH_LENGTH {
            return Ok(Vec::new());
        }

        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events e
            WHERE e.title LIKE ?1 ESCAPE '\'
               OR e.subtitle LIKE ?1 ESCAPE '\'
               OR e.summary LIKE ?1 ESCAPE '\'
               OR e.abstract LIKE ?1 ESCAPE '\'
               OR e.track LIKE ?1 ESCAPE '\'
               OR EXISTS (
                   SELECT 1 FROM event_people ep
                   JOIN people p ON p.id = ep.person_id
                   WHERE ep.event_id = e.id AND p.name LIKE ?1 ESCAPE '\'
               )
            ORDER BY e.date, e.start, e.id
            "#
        ))
        .bind(like_pattern(query))
        .fetch_all(&mut *snapshot)
        .await?;

        hydrate(snapshot, rows).await
    }
}

/// Events by id, in the order given
#[derive(Debug, Clone)]
pub struct EventsForIdentifiers {
    pub ids: Vec<EventId>,
}

impl EventsForIdentifiers {
    pub fn new(ids: impl IntoIterator<Item = EventId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Read for EventsForIdentifiers {
    type Output = Vec<Event>;

    async fn perform(&self, snapshot: &mut SqliteConnection) -> Result<Vec<Event>, OperationError> {
        load_by_ids(snapshot, &self.ids).await
    }
}

/// Events running at a given instant (boundaries excluded, like [`Event::is_live`])
#[derive(Debug, Clone)]
pub struct EventsLiveAt {
    pub at: DateTime<Utc>,
}

#[async_trait]
impl Read for EventsLiveAt {
    type Output = Vec<Event>;

    async fn perform(&self, snapshot: &mut SqliteConnection) -> Result<Vec<Event>, OperationError> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events e
            WHERE e.date < ?1 AND ?1 < e.date + e.duration_minutes * 60000
            ORDER BY e.date, e.start, e.id
            "#
        ))
        .bind(self.at.timestamp_millis())
        .fetch_all(&mut *snapshot)
        .await?;

        hydrate(snapshot, rows).await
    }
}
