// Event Domain Model

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Event ID (assigned by the schedule feed)
pub type EventId = i64;

/// Person ID (assigned by the schedule feed)
pub type PersonId = i64;

/// Speaker or moderator attached to an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub name: String,
}

/// External link (slides, recordings, project pages)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub name: String,
    pub url: Option<String>,
}

impl Link {
    /// Whether the link points at an mp4 recording
    pub fn is_video(&self) -> bool {
        self.url
            .as_deref()
            .map(|url| {
                let path = url.split(['?', '#']).next().unwrap_or(url);
                path.to_ascii_lowercase().ends_with(".mp4")
            })
            .unwrap_or(false)
    }
}

/// File attached to an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// A single talk, workshop or BOF session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub room: String,
    pub track: String,

    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,

    /// Start instant
    pub date: DateTime<Utc>,
    /// Local wall-clock start, as printed in the programme
    pub start: NaiveTime,
    pub duration_minutes: i64,

    #[serde(default)]
    pub links: Vec<Link>,
    #[serde(default)]
    pub people: Vec<Person>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Event {
    /// First link pointing at an mp4 recording
    pub fn video(&self) -> Option<&Link> {
        self.links.iter().find(|link| link.is_video())
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.date + Duration::minutes(self.duration_minutes)
    }

    /// Whether `at` falls strictly inside the event's time slot
    pub fn is_live(&self, at: DateTime<Utc>) -> bool {
        self.date < at && at < self.end()
    }

    pub fn is_same_weekday(&self, other: &Event) -> bool {
        self.date.weekday() == other.date.weekday()
    }

    /// Speaker names joined for captions ("Alice, Bob")
    pub fn formatted_people(&self) -> String {
        self.people
            .iter()
            .map(|person| person.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}
