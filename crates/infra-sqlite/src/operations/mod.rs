// Schedule Store Operations

mod events;
mod favorites;
mod import;
mod tracks;

pub use events::{EventsForIdentifiers, EventsForSearch, EventsForTrack, EventsLiveAt, MIN_SEARCH_LENGTH};
pub use favorites::{
    AddFavoriteEvent, AddFavoriteTrack, FavoriteEventIds, FavoriteEvents, FavoriteTrackNames,
    IsFavoriteEvent, IsFavoriteTrack, RemoveFavoriteEvent, RemoveFavoriteTrack,
};
pub use import::ImportSchedule;
pub use tracks::AllTracks;
