//! Persistence Service - Definition of Done
//!
//! End-to-end checks of the writer queue, snapshot readers, migrations and
//! shutdown against real database files.

use async_trait::async_trait;
use fosdem_core::StoreConfig;
use fosdem_infra_sqlite::{
    read_fn, Migration, MigrationRegistry, OperationError, PersistenceError, PersistenceService, Read,
    ServiceState, Write,
};
use futures::future::{join_all, BoxFuture};
use sqlx::SqliteConnection;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::Notify;

const OPENING_BALANCE: i64 = 1_000;

fn seed_notes(conn: &mut SqliteConnection) -> BoxFuture<'_, Result<(), sqlx::Error>> {
    Box::pin(async move {
        sqlx::query("CREATE TABLE notes (body TEXT NOT NULL)")
            .execute(&mut *conn)
            .await?;
        sqlx::query("INSERT INTO notes (body) VALUES ('seeded by migration 3')")
            .execute(&mut *conn)
            .await?;
        Ok(())
    })
}

fn registry() -> MigrationRegistry {
    MigrationRegistry::new([
        Migration::sql(2, "log", "CREATE TABLE log (seq INTEGER NOT NULL);"),
        Migration::sql(
            1,
            "accounts",
            "CREATE TABLE accounts (id INTEGER PRIMARY KEY, balance INTEGER NOT NULL);
             INSERT INTO accounts (id, balance) VALUES (1, 1000), (2, 0);",
        ),
        Migration::function(3, "notes", seed_notes),
    ])
    .unwrap()
}

fn file_config(dir: &TempDir) -> StoreConfig {
    StoreConfig::file(dir.path().join("store.db"))
}

/// Move `amount` between the two accounts, pausing between the two halves
struct Transfer {
    amount: i64,
}

#[async_trait]
impl Write for Transfer {
    async fn perform(&self, writer: &mut SqliteConnection) -> Result<(), OperationError> {
        sqlx::query("UPDATE accounts SET balance = balance - ? WHERE id = 1")
            .bind(self.amount)
            .execute(&mut *writer)
            .await?;
        tokio::time::sleep(Duration::from_millis(2)).await;
        sqlx::query("UPDATE accounts SET balance = balance + ? WHERE id = 2")
            .bind(self.amount)
            .execute(&mut *writer)
            .await?;
        Ok(())
    }
}

struct TotalBalance;

#[async_trait]
impl Read for TotalBalance {
    type Output = i64;

    async fn perform(&self, snapshot: &mut SqliteConnection) -> Result<i64, OperationError> {
        let total = sqlx::query_scalar("SELECT SUM(balance) FROM accounts")
            .fetch_one(&mut *snapshot)
            .await?;
        Ok(total)
    }
}

struct Append {
    seq: i64,
}

#[async_trait]
impl Write for Append {
    async fn perform(&self, writer: &mut SqliteConnection) -> Result<(), OperationError> {
        sqlx::query("INSERT INTO log (seq) VALUES (?)")
            .bind(self.seq)
            .execute(&mut *writer)
            .await?;
        Ok(())
    }
}

/// Append, then hold the transaction open for `hold`
struct SlowAppend {
    seq: i64,
    hold: Duration,
    inserted: Arc<Notify>,
}

#[async_trait]
impl Write for SlowAppend {
    async fn perform(&self, writer: &mut SqliteConnection) -> Result<(), OperationError> {
        sqlx::query("INSERT INTO log (seq) VALUES (?)")
            .bind(self.seq)
            .execute(&mut *writer)
            .await?;
        self.inserted.notify_one();
        tokio::time::sleep(self.hold).await;
        Ok(())
    }
}

struct LogEntries;

#[async_trait]
impl Read for LogEntries {
    type Output = Vec<i64>;

    async fn perform(&self, snapshot: &mut SqliteConnection) -> Result<Vec<i64>, OperationError> {
        let seqs = sqlx::query_scalar("SELECT seq FROM log ORDER BY rowid")
            .fetch_all(&mut *snapshot)
            .await?;
        Ok(seqs)
    }
}

#[tokio::test]
async fn test_open_applies_all_migrations_once() {
    let dir = tempfile::tempdir().unwrap();

    let first = PersistenceService::open(&file_config(&dir), &registry()).await;
    assert_eq!(first.state(), ServiceState::Ready);
    assert_eq!(first.migration_report().applied, vec![1, 2, 3]);

    let notes = first
        .perform_read(read_fn(|db| {
            Box::pin(async move {
                let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notes")
                    .fetch_one(&mut *db)
                    .await?;
                Ok(n)
            })
        }))
        .await
        .unwrap();
    assert_eq!(notes, 1);
    first.close().await;

    let second = PersistenceService::open(&file_config(&dir), &registry()).await;
    assert_eq!(second.state(), ServiceState::Ready);
    assert!(second.migration_report().applied.is_empty());
    assert_eq!(second.migration_report().current_version, 3);
    assert_eq!(second.perform_read(TotalBalance).await.unwrap(), OPENING_BALANCE);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_observe_partial_writes() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(PersistenceService::open(&file_config(&dir), &registry()).await);

    let writes: Vec<_> = (1..=20)
        .map(|amount| service.perform_write(Transfer { amount }))
        .collect();

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move {
                let mut totals = Vec::new();
                for _ in 0..25 {
                    totals.push(service.perform_read(TotalBalance).await.unwrap());
                    tokio::task::yield_now().await;
                }
                totals
            })
        })
        .collect();

    for result in join_all(writes).await {
        result.unwrap();
    }
    for reader in readers {
        for total in reader.await.unwrap() {
            assert_eq!(total, OPENING_BALANCE);
        }
    }

    let moved: i64 = service
        .perform_read(read_fn(|db| {
            Box::pin(async move {
                let balance: i64 = sqlx::query_scalar("SELECT balance FROM accounts WHERE id = 2")
                    .fetch_one(&mut *db)
                    .await?;
                Ok(balance)
            })
        }))
        .await
        .unwrap();
    assert_eq!(moved, (1..=20).sum::<i64>());
}

#[tokio::test]
async fn test_writes_apply_in_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let service = PersistenceService::open(&file_config(&dir), &registry()).await;

    let handles: Vec<_> = (0..50).map(|seq| service.perform_write(Append { seq })).collect();
    // Await in reverse: order is fixed at submission, not at await
    for handle in handles.into_iter().rev() {
        handle.await.unwrap();
    }

    let entries = service.perform_read(LogEntries).await.unwrap();
    assert_eq!(entries, (0..50).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_write_does_not_stall_file_reads() {
    let dir = tempfile::tempdir().unwrap();
    let service = PersistenceService::open(&file_config(&dir), &registry()).await;
    let inserted = Arc::new(Notify::new());

    let write = service.perform_write(SlowAppend {
        seq: 7,
        hold: Duration::from_millis(800),
        inserted: inserted.clone(),
    });
    inserted.notified().await;

    let started = Instant::now();
    let during = service.perform_read(LogEntries).await.unwrap();
    let elapsed = started.elapsed();

    // Snapshot from before the uncommitted insert, served while the writer is busy
    assert!(during.is_empty());
    assert!(elapsed < Duration::from_millis(400), "read waited {elapsed:?}");

    write.await.unwrap();
    assert_eq!(service.perform_read(LogEntries).await.unwrap(), vec![7]);
}

#[tokio::test]
async fn test_completed_write_is_visible_to_next_read() {
    let dir = tempfile::tempdir().unwrap();
    let service = PersistenceService::open(&file_config(&dir), &registry()).await;

    for seq in 0..10 {
        service.perform_write(Append { seq }).await.unwrap();
        let entries = service.perform_read(LogEntries).await.unwrap();
        assert_eq!(entries.len() as i64, seq + 1);
    }
}

#[tokio::test]
async fn test_failed_write_leaves_no_trace() {
    let dir = tempfile::tempdir().unwrap();
    let service = PersistenceService::open(&file_config(&dir), &registry()).await;

    struct HalfTransfer;

    #[async_trait]
    impl Write for HalfTransfer {
        async fn perform(&self, writer: &mut SqliteConnection) -> Result<(), OperationError> {
            sqlx::query("UPDATE accounts SET balance = balance - 500 WHERE id = 1")
                .execute(&mut *writer)
                .await?;
            // Violates NOT NULL after the first statement succeeded
            sqlx::query("UPDATE accounts SET balance = NULL WHERE id = 2")
                .execute(&mut *writer)
                .await?;
            Ok(())
        }
    }

    let err = service.perform_write(HalfTransfer).await.unwrap_err();
    assert!(matches!(
        err,
        PersistenceError::Operation(OperationError::Database(_))
    ));
    assert_eq!(service.perform_read(TotalBalance).await.unwrap(), OPENING_BALANCE);

    // The writer keeps serving
    service.perform_write(Transfer { amount: 1 }).await.unwrap();
    assert_eq!(service.perform_read(TotalBalance).await.unwrap(), OPENING_BALANCE);
}

#[tokio::test]
async fn test_panicking_read_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let service = PersistenceService::open(&file_config(&dir), &registry()).await;

    struct Exploding;

    #[async_trait]
    impl Read for Exploding {
        type Output = ();

        async fn perform(&self, _snapshot: &mut SqliteConnection) -> Result<(), OperationError> {
            panic!("reader exploded");
        }
    }

    let err = service.perform_read(Exploding).await.unwrap_err();
    match err {
        PersistenceError::Operation(OperationError::Panicked(message)) => {
            assert!(message.contains("reader exploded"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(service.perform_read(TotalBalance).await.unwrap(), OPENING_BALANCE);
}

#[tokio::test]
async fn test_close_drains_queued_writes() {
    let dir = tempfile::tempdir().unwrap();
    let service = PersistenceService::open(&file_config(&dir), &registry()).await;

    let handles: Vec<_> = (0..20).map(|seq| service.perform_write(Append { seq })).collect();
    service.close().await;

    for handle in handles {
        handle.await.unwrap();
    }
    assert!(matches!(
        service.perform_read(LogEntries).await,
        Err(PersistenceError::Closed)
    ));

    let reopened = PersistenceService::open(&file_config(&dir), &registry()).await;
    assert_eq!(reopened.perform_read(LogEntries).await.unwrap().len(), 20);
}

#[tokio::test]
async fn test_in_memory_store_reads_through_writer() {
    let service = PersistenceService::open(&StoreConfig::in_memory(), &registry()).await;
    assert_eq!(service.state(), ServiceState::Ready);

    let append = service.perform_write(Append { seq: 7 });
    let read = service.perform_read(LogEntries);

    // The read was queued after the write, so it sees it
    assert_eq!(read.await.unwrap(), vec![7]);
    append.await.unwrap();
}

#[tokio::test]
async fn test_unreadable_file_fails_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    std::fs::write(&path, b"this is definitely not a sqlite database, just plain text padding").unwrap();

    let service = PersistenceService::open(&StoreConfig::file(&path), &registry()).await;
    assert_eq!(service.state(), ServiceState::Failed);
    assert!(service.open_error().is_some());
    assert!(matches!(
        service.perform_read(TotalBalance).await,
        Err(PersistenceError::Unavailable(_))
    ));
}
