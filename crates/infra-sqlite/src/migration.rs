// Migration Runner
//
// Applied versions live in the `schema_migrations` ledger and in
// `PRAGMA user_version`; both are updated in the same transaction as the
// migration body.

use crate::error::MigrationError;
use futures::future::BoxFuture;
use sqlx::{Connection, SqliteConnection};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Migration body taking the schema from `version - 1` to `version`
#[derive(Clone, Copy)]
pub enum MigrationBody {
    /// Batch of SQL statements
    Sql(&'static str),
    /// Arbitrary transformation (data backfills, conditional DDL)
    Function(for<'c> fn(&'c mut SqliteConnection) -> BoxFuture<'c, Result<(), sqlx::Error>>),
}

/// One versioned schema transformation
#[derive(Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    body: MigrationBody,
}

impl Migration {
    pub const fn sql(version: i64, name: &'static str, sql: &'static str) -> Self {
        Self {
            version,
            name,
            body: MigrationBody::Sql(sql),
        }
    }

    pub const fn function(
        version: i64,
        name: &'static str,
        body: for<'c> fn(&'c mut SqliteConnection) -> BoxFuture<'c, Result<(), sqlx::Error>>,
    ) -> Self {
        Self {
            version,
            name,
            body: MigrationBody::Function(body),
        }
    }

    async fn run(&self, conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
        match self.body {
            MigrationBody::Sql(sql) => {
                sqlx::raw_sql(sql).execute(&mut *conn).await?;
                Ok(())
            }
            MigrationBody::Function(body) => body(conn).await,
        }
    }
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("version", &self.version)
            .field("name", &self.name)
            .finish()
    }
}

/// Outcome of [`MigrationRegistry::apply`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Versions applied by this call, ascending
    pub applied: Vec<i64>,
    /// Schema version after the call
    pub current_version: i64,
}

/// Ordered, validated set of migrations
#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    migrations: Vec<Migration>,
}

impl MigrationRegistry {
    /// Validate and order `migrations`; duplicate versions are rejected
    pub fn new(migrations: impl IntoIterator<Item = Migration>) -> Result<Self, MigrationError> {
        let mut migrations: Vec<Migration> = migrations.into_iter().collect();
        migrations.sort_by_key(|m| m.version);

        for pair in migrations.windows(2) {
            if pair[0].version == pair[1].version {
                return Err(MigrationError::DuplicateVersion(pair[0].version));
            }
        }
        if let Some(first) = migrations.first() {
            if first.version < 1 {
                return Err(MigrationError::InvalidVersion(first.version));
            }
        }

        Ok(Self { migrations })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Highest registered version (0 when empty)
    pub fn latest_version(&self) -> i64 {
        self.migrations.last().map(|m| m.version).unwrap_or(0)
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Read the recorded schema version without touching the file.
    ///
    /// Fails with [`MigrationError::SchemaTooNew`] when a newer build wrote the
    /// database; nothing is created or changed in that case.
    pub async fn check_compatible(&self, conn: &mut SqliteConnection) -> Result<i64, MigrationError> {
        let (applied, user_version) = recorded_versions(conn).await?;
        let recorded = applied.iter().copied().max().unwrap_or(0).max(user_version);
        let latest = self.latest_version();
        if recorded > latest {
            return Err(MigrationError::SchemaTooNew { recorded, latest });
        }
        Ok(recorded)
    }

    /// Run every pending migration against the writer connection
    pub async fn apply(&self, conn: &mut SqliteConnection) -> Result<MigrationReport, MigrationError> {
        info!("Running database migrations...");

        // No DDL before this: a newer schema stays as it was written
        let recorded = self.check_compatible(conn).await?;
        info!("Current schema version: {}", recorded);

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(MigrationError::Unreadable)?;

        let (applied, _) = recorded_versions(conn).await?;

        for version in &applied {
            if !self.migrations.iter().any(|m| m.version == *version) {
                warn!(version, "Database records a migration that is no longer registered");
            }
        }

        let mut report = MigrationReport {
            applied: Vec::new(),
            current_version: recorded,
        };

        for migration in &self.migrations {
            if applied.contains(&migration.version) {
                debug!(version = migration.version, "Migration already applied, skipping");
                continue;
            }
            if migration.version < report.current_version {
                return Err(MigrationError::OutOfOrder {
                    version: migration.version,
                    recorded: report.current_version,
                });
            }

            info!(
                "Applying migration {:03}: {}",
                migration.version, migration.name
            );
            apply_migration(conn, migration)
                .await
                .map_err(|source| MigrationError::Failed {
                    version: migration.version,
                    name: migration.name,
                    source,
                })?;

            report.applied.push(migration.version);
            report.current_version = migration.version;
        }

        info!(
            applied = report.applied.len(),
            version = report.current_version,
            "All migrations applied successfully"
        );
        Ok(report)
    }
}

/// Ledger versions (empty when there is no ledger yet) and `user_version`.
/// Read-only; the first statement doubles as the check for foreign files.
async fn recorded_versions(conn: &mut SqliteConnection) -> Result<(BTreeSet<i64>, i64), MigrationError> {
    let user_version: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(&mut *conn)
        .await
        .map_err(MigrationError::Unreadable)?;

    let has_ledger: i64 = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_migrations')",
    )
    .fetch_one(&mut *conn)
    .await
    .map_err(MigrationError::Unreadable)?;

    if has_ledger == 0 {
        return Ok((BTreeSet::new(), user_version));
    }

    let applied = sqlx::query_scalar("SELECT version FROM schema_migrations")
        .fetch_all(&mut *conn)
        .await
        .map_err(MigrationError::Unreadable)?
        .into_iter()
        .collect();
    Ok((applied, user_version))
}

/// Apply a single migration together with its ledger entry
async fn apply_migration(conn: &mut SqliteConnection, migration: &Migration) -> Result<(), sqlx::Error> {
    // Execute migration in a transaction; dropping it on error rolls back
    let mut tx = conn.begin().await?;

    migration.run(&mut tx).await?;

    sqlx::query("INSERT INTO schema_migrations (version, name, applied_at) VALUES (?, ?, ?)")
        .bind(migration.version)
        .bind(migration.name)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await?;

    // PRAGMA does not accept bound parameters; version is an i64
    sqlx::query(&format!("PRAGMA user_version = {}", migration.version))
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::ConnectOptions;
    use sqlx::sqlite::SqliteConnectOptions;
    use std::str::FromStr;

    async fn memory() -> SqliteConnection {
        SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .connect()
            .await
            .unwrap()
    }

    fn registry() -> MigrationRegistry {
        MigrationRegistry::new([
            Migration::sql(2, "add_rooms", "CREATE TABLE rooms (name TEXT PRIMARY KEY);"),
            Migration::sql(
                1,
                "initial",
                "CREATE TABLE talks (id INTEGER PRIMARY KEY, title TEXT NOT NULL);
                 CREATE INDEX idx_talks_title ON talks(title);",
            ),
        ])
        .unwrap()
    }

    async fn table_exists(conn: &mut SqliteConnection, name: &str) -> bool {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?")
                .bind(name)
                .fetch_one(&mut *conn)
                .await
                .unwrap();
        count > 0
    }

    fn seed_talk(conn: &mut SqliteConnection) -> BoxFuture<'_, Result<(), sqlx::Error>> {
        Box::pin(async move {
            sqlx::query("INSERT INTO talks (id, title) VALUES (1, 'seeded')")
                .execute(&mut *conn)
                .await?;
            Ok(())
        })
    }

    #[test]
    fn test_registry_sorts_and_rejects_duplicates() {
        let registry = registry();
        let versions: Vec<i64> = registry.migrations().iter().map(|m| m.version).collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(registry.latest_version(), 2);

        let err = MigrationRegistry::new([
            Migration::sql(1, "a", "SELECT 1;"),
            Migration::sql(1, "b", "SELECT 1;"),
        ])
        .unwrap_err();
        assert!(matches!(err, MigrationError::DuplicateVersion(1)));

        let err = MigrationRegistry::new([Migration::sql(0, "zero", "SELECT 1;")]).unwrap_err();
        assert!(matches!(err, MigrationError::InvalidVersion(0)));
    }

    #[tokio::test]
    async fn test_run_migrations() {
        let mut conn = memory().await;
        let report = registry().apply(&mut conn).await.unwrap();

        assert_eq!(report.applied, vec![1, 2]);
        assert_eq!(report.current_version, 2);
        assert!(table_exists(&mut conn, "talks").await);
        assert!(table_exists(&mut conn, "rooms").await);

        let user_version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        assert_eq!(user_version, 2);
    }

    #[tokio::test]
    async fn test_reapply_is_noop() {
        let mut conn = memory().await;
        registry().apply(&mut conn).await.unwrap();
        let report = registry().apply(&mut conn).await.unwrap();

        assert!(report.applied.is_empty());
        assert_eq!(report.current_version, 2);
    }

    #[tokio::test]
    async fn test_empty_registry_yields_versioned_schema() {
        let mut conn = memory().await;
        let report = MigrationRegistry::empty().apply(&mut conn).await.unwrap();

        assert_eq!(report, MigrationReport::default());
        assert!(table_exists(&mut conn, "schema_migrations").await);
    }

    #[tokio::test]
    async fn test_failed_migration_rolls_back_and_halts() {
        let mut conn = memory().await;
        let registry = MigrationRegistry::new([
            Migration::sql(1, "initial", "CREATE TABLE talks (id INTEGER PRIMARY KEY);"),
            Migration::sql(
                2,
                "broken",
                "CREATE TABLE half_done (id INTEGER); THIS IS NOT SQL;",
            ),
            Migration::sql(3, "never", "CREATE TABLE never (id INTEGER);"),
        ])
        .unwrap();

        let err = registry.apply(&mut conn).await.unwrap_err();
        assert!(matches!(
            err,
            MigrationError::Failed {
                version: 2,
                name: "broken",
                ..
            }
        ));

        assert!(table_exists(&mut conn, "talks").await);
        assert!(!table_exists(&mut conn, "half_done").await);
        assert!(!table_exists(&mut conn, "never").await);

        let user_version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        assert_eq!(user_version, 1);
    }

    #[tokio::test]
    async fn test_schema_too_new() {
        let mut conn = memory().await;
        registry().apply(&mut conn).await.unwrap();

        let older = MigrationRegistry::new([Migration::sql(1, "initial", "SELECT 1;")]).unwrap();
        let err = older.apply(&mut conn).await.unwrap_err();
        assert!(matches!(
            err,
            MigrationError::SchemaTooNew {
                recorded: 2,
                latest: 1
            }
        ));
    }

    #[tokio::test]
    async fn test_schema_too_new_leaves_file_untouched() {
        let mut conn = memory().await;
        sqlx::query("PRAGMA user_version = 5").execute(&mut conn).await.unwrap();

        let err = MigrationRegistry::empty().apply(&mut conn).await.unwrap_err();
        assert!(matches!(err, MigrationError::SchemaTooNew { recorded: 5, latest: 0 }));
        assert!(!table_exists(&mut conn, "schema_migrations").await);

        let user_version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        assert_eq!(user_version, 5);
    }

    #[tokio::test]
    async fn test_out_of_order_migration_rejected() {
        let mut conn = memory().await;
        MigrationRegistry::new([Migration::sql(2, "second", "SELECT 1;")])
            .unwrap()
            .apply(&mut conn)
            .await
            .unwrap();

        let err = MigrationRegistry::new([
            Migration::sql(1, "late_first", "SELECT 1;"),
            Migration::sql(2, "second", "SELECT 1;"),
        ])
        .unwrap()
        .apply(&mut conn)
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            MigrationError::OutOfOrder {
                version: 1,
                recorded: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_function_migration() {
        let mut conn = memory().await;
        let registry = MigrationRegistry::new([
            Migration::sql(1, "initial", "CREATE TABLE talks (id INTEGER PRIMARY KEY, title TEXT NOT NULL);"),
            Migration::function(2, "seed", seed_talk),
        ])
        .unwrap();

        registry.apply(&mut conn).await.unwrap();

        let title: String = sqlx::query_scalar("SELECT title FROM talks WHERE id = 1")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        assert_eq!(title, "seeded");
    }
}
