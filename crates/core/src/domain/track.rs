// Track Domain Model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Track name doubles as the track identifier
pub type TrackName = String;

/// Thematic grouping of events (devrooms, main tracks)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Track {
    pub name: TrackName,
    /// Conference day the track runs on (1-based)
    pub day: i64,
}

/// Group tracks by conference day, days ascending and tracks sorted by name
pub fn tracks_by_day(tracks: &[Track]) -> Vec<Vec<Track>> {
    let mut days: BTreeMap<i64, Vec<Track>> = BTreeMap::new();
    for track in tracks {
        days.entry(track.day).or_default().push(track.clone());
    }

    days.into_values()
        .map(|mut tracks| {
            tracks.sort_by(|lhs, rhs| lhs.name.cmp(&rhs.name));
            tracks
        })
        .collect()
}
