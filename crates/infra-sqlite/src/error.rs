// Persistence Error Taxonomy
//
// OpenError / MigrationError are terminal for a service instance;
// OperationError is local to the single read or write that raised it.

use fosdem_core::DomainError;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Opening the store failed; the service instance is unusable
#[derive(Error, Debug)]
pub enum OpenError {
    #[error("Cannot open database {}: {source}", display_path(.path))]
    Connect {
        path: Option<PathBuf>,
        #[source]
        source: sqlx::Error,
    },

    #[error("Cannot configure database connection: {0}")]
    Configure(#[source] sqlx::Error),

    #[error("Cannot attach reader connections: {0}")]
    Readers(#[source] sqlx::Error),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

fn display_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => path.display().to_string(),
        None => ":memory:".to_string(),
    }
}

/// Schema migration failed or the registry is inconsistent
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Migration version {0} is registered more than once")]
    DuplicateVersion(i64),

    #[error("Migration version {0} is invalid (versions start at 1)")]
    InvalidVersion(i64),

    #[error("Database is unreadable or corrupt: {0}")]
    Unreadable(#[source] sqlx::Error),

    #[error("Database schema version {recorded} is newer than the latest known migration {latest}")]
    SchemaTooNew { recorded: i64, latest: i64 },

    #[error("Migration {version} is pending but the database is already at version {recorded}")]
    OutOfOrder { version: i64, recorded: i64 },

    #[error("Migration {version} ({name}) failed: {source}")]
    Failed {
        version: i64,
        name: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

/// A single read or write failed
#[derive(Error, Debug)]
pub enum OperationError {
    #[error("{}", describe_sqlx_error(.0))]
    Database(#[from] sqlx::Error),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Error raised by the operation body itself, carried unchanged
    #[error("{0}")]
    Aborted(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Operation panicked: {0}")]
    Panicked(String),
}

impl OperationError {
    pub fn aborted<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        OperationError::Aborted(Box::new(err))
    }

    /// The caller-supplied error, if this is an [`OperationError::Aborted`] of type `E`
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            OperationError::Aborted(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

/// What a caller of the persistence service receives on failure
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// The service failed to open; the stored error is returned without touching the store
    #[error("Persistence unavailable: {0}")]
    Unavailable(Arc<OpenError>),

    #[error(transparent)]
    Operation(#[from] OperationError),

    #[error("Persistence service is closed")]
    Closed,
}

impl PersistenceError {
    /// Shortcut for `Operation(err)` → `err.downcast_ref::<E>()`
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        match self {
            PersistenceError::Operation(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

fn sqlite_code(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|code| code.into_owned()),
        _ => None,
    }
}

/// Human-readable classification of SQLite failures
///
/// SQLite error codes: https://www.sqlite.org/rescode.html
pub(crate) fn describe_sqlx_error(err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) => match sqlite_code(err).as_deref() {
            Some(code @ ("2067" | "1555")) => format!(
                "Unique constraint violation: {} ({})",
                db_err.message(),
                code
            ),
            Some(code @ ("787" | "3850")) => format!(
                "Foreign key constraint violation: {} ({})",
                db_err.message(),
                code
            ),
            Some("5") => format!("Database locked (SQLITE_BUSY): {}", db_err.message()),
            Some("13") => format!("Database full: {}", db_err.message()),
            Some("26") => format!("File is not a database: {}", db_err.message()),
            Some(code) => format!("Database error [{}]: {}", code, db_err.message()),
            None => format!("Database error: {}", db_err.message()),
        },
        sqlx::Error::RowNotFound => "Row not found".to_string(),
        sqlx::Error::ColumnNotFound(col) => format!("Column not found: {}", col),
        sqlx::Error::PoolClosed => "Reader pool closed".to_string(),
        _ => format!("Database error: {}", err),
    }
}
