// FOSDEM Infrastructure - SQLite Persistence
// Implements: migration registry, connection pool (one writer, snapshot readers),
// Read/Write operation protocol, persistence service, schedule operations

mod connection;
mod error;
mod migration;
mod operation;
pub mod operations;
pub mod schema;
mod service;
pub mod services;

pub use connection::{ConnectionPool, Reply};
pub use error::{MigrationError, OpenError, OperationError, PersistenceError};
pub use migration::{Migration, MigrationBody, MigrationRegistry, MigrationReport};
pub use operation::{read_fn, write_fn, Read, ReadFn, Write, WriteFn};
pub use service::{OperationHandle, PersistenceService, ServiceState};
pub use services::{FavoritesService, ImportSummary, ScheduleService};

// Re-exported so operation bodies can name the connection type without a direct sqlx dependency
pub use sqlx::SqliteConnection;
