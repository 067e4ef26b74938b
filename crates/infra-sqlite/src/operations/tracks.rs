// Track Reads

use crate::error::OperationError;
use crate::operation::Read;
use async_trait::async_trait;
use fosdem_core::domain::Track;
use sqlx::SqliteConnection;

#[derive(Debug, sqlx::FromRow)]
struct TrackRow {
    name: String,
    day: i64,
}

impl From<TrackRow> for Track {
    fn from(row: TrackRow) -> Self {
        Track {
            name: row.name,
            day: row.day,
        }
    }
}

/// Every track, ordered by name
#[derive(Debug, Clone, Copy, Default)]
pub struct AllTracks;

#[async_trait]
impl Read for AllTracks {
    type Output = Vec<Track>;

    async fn perform(&self, snapshot: &mut SqliteConnection) -> Result<Vec<Track>, OperationError> {
        let rows: Vec<TrackRow> = sqlx::query_as("SELECT name, day FROM tracks ORDER BY name")
            .fetch_all(&mut *snapshot)
            .await?;

        Ok(rows.into_iter().map(Track::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::test_support::{memory_store, sample_schedule};
    use crate::operations::ImportSchedule;
    use fosdem_core::domain::tracks_by_day;

    #[tokio::test]
    async fn test_all_tracks_on_empty_store() {
        let store = memory_store().await;
        assert!(store.perform_read(AllTracks).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_all_tracks_sorted_by_name() {
        let store = memory_store().await;
        store.perform_write(ImportSchedule::new(sample_schedule())).await.unwrap();

        let tracks = store.perform_read(AllTracks).await.unwrap();
        let names: Vec<_> = tracks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Databases", "Go", "Rust"]);

        let days = tracks_by_day(&tracks);
        assert_eq!(days.len(), 2);
        assert_eq!(days[1][0].name, "Go");
    }
}
