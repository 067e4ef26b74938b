// Application Schema
//
// Append-only: released migrations are never edited, new ones get the next version.

use crate::error::MigrationError;
use crate::migration::{Migration, MigrationRegistry};

pub const MIGRATIONS: &[Migration] = &[
    Migration::sql(
        1,
        "initial_schema",
        include_str!("../migrations/001_initial_schema.sql"),
    ),
    Migration::sql(2, "favorites", include_str!("../migrations/002_favorites.sql")),
    Migration::sql(
        3,
        "search_indexes",
        include_str!("../migrations/003_search_indexes.sql"),
    ),
];

/// Registry of every schedule-store migration
pub fn migrations() -> Result<MigrationRegistry, MigrationError> {
    MigrationRegistry::new(MIGRATIONS.iter().copied())
}
