// SQLite Connection Pool Setup
//
// One writer connection owned by a dedicated worker task (FIFO job queue) and,
// for file stores, a pool of read-only connections. WAL gives every reader a
// snapshot that is either entirely before or entirely after any commit.
// In-memory stores have no second handle onto the data, so their reads are
// queued on the writer and run inside a transaction that is rolled back.

use crate::error::{OpenError, OperationError};
use crate::migration::{MigrationRegistry, MigrationReport};
use crate::operation::{Read, Write};
use async_trait::async_trait;
use fosdem_core::StoreConfig;
use futures::FutureExt;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{ConnectOptions, Connection, Sqlite, SqliteConnection, Transaction};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Upper bound on reads in flight; only reached when the pool is draining
const READ_SLOTS: u32 = u32::MAX >> 3;

/// Reply channel of a scheduled operation
pub type Reply<T> = oneshot::Receiver<Result<T, OperationError>>;

/// Unit of work executed by the writer task
#[async_trait]
trait WriterJob: Send {
    async fn run(self: Box<Self>, conn: &mut SqliteConnection);
}

struct WriteJob<W> {
    op: W,
    reply: oneshot::Sender<Result<(), OperationError>>,
}

#[async_trait]
impl<W: Write> WriterJob for WriteJob<W> {
    async fn run(self: Box<Self>, conn: &mut SqliteConnection) {
        let WriteJob { op, reply } = *self;
        let result = guarded(execute_write(conn, &op)).await;
        // Caller may have dropped the handle; the write still happened
        let _ = reply.send(result);
    }
}

struct ReadJob<R: Read> {
    op: R,
    reply: oneshot::Sender<Result<R::Output, OperationError>>,
}

#[async_trait]
impl<R: Read> WriterJob for ReadJob<R> {
    async fn run(self: Box<Self>, conn: &mut SqliteConnection) {
        let ReadJob { op, reply } = *self;
        let result = guarded(execute_read(conn, &op)).await;
        let _ = reply.send(result);
    }
}

/// Owner of the writer connection and the reader pool
pub struct ConnectionPool {
    location: String,
    writer: Mutex<Option<mpsc::UnboundedSender<Box<dyn WriterJob>>>>,
    writer_task: Mutex<Option<JoinHandle<()>>>,
    readers: Option<SqlitePool>,
    inflight_reads: Arc<Semaphore>,
}

impl ConnectionPool {
    /// Open the writer, migrate it, then attach readers.
    ///
    /// Must be called from within a Tokio runtime (the writer runs as a task).
    pub async fn open(
        config: &StoreConfig,
        registry: &MigrationRegistry,
    ) -> Result<(Self, MigrationReport), OpenError> {
        let location = match &config.db_path {
            Some(path) => path.display().to_string(),
            None => ":memory:".to_string(),
        };
        info!(location = %location, "Opening database");

        let mut writer = connect_writer(config).await?;

        // A file from a newer build is rejected before anything is written to it
        if let Err(e) = registry.check_compatible(&mut writer).await {
            close_quietly(writer).await;
            return Err(e.into());
        }

        if let Err(e) = configure_writer(&mut writer, config.db_path.is_some()).await {
            close_quietly(writer).await;
            return Err(OpenError::Configure(e));
        }

        let report = match registry.apply(&mut writer).await {
            Ok(report) => report,
            Err(e) => {
                close_quietly(writer).await;
                return Err(e.into());
            }
        };

        let readers = match &config.db_path {
            Some(path) => match connect_readers(path, config).await {
                Ok(readers) => Some(readers),
                Err(e) => {
                    close_quietly(writer).await;
                    return Err(OpenError::Readers(e));
                }
            },
            None => None,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(run_writer(writer, rx));

        debug!(
            location = %location,
            readers = readers.as_ref().map(|p| p.options().get_max_connections()).unwrap_or(0),
            "Connection pool ready"
        );

        let pool = Self {
            location,
            writer: Mutex::new(Some(tx)),
            writer_task: Mutex::new(Some(writer_task)),
            readers,
            inflight_reads: Arc::new(Semaphore::new(READ_SLOTS as usize)),
        };
        Ok((pool, report))
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_in_memory(&self) -> bool {
        self.readers.is_none()
    }

    /// Queue a write behind every previously submitted write
    pub fn submit_write<W: Write>(&self, op: W) -> Reply<()> {
        let (reply, rx) = oneshot::channel();
        self.enqueue(Box::new(WriteJob { op, reply }));
        rx
    }

    /// Run a read on its own snapshot.
    ///
    /// File stores spawn a task on a reader connection; in-memory stores queue
    /// the read on the writer. A dropped reply sender means the pool is closed.
    pub fn submit_read<R: Read>(&self, op: R) -> Reply<R::Output> {
        let (reply, rx) = oneshot::channel();

        let Some(readers) = &self.readers else {
            self.enqueue(Box::new(ReadJob { op, reply }));
            return rx;
        };

        let Ok(permit) = self.inflight_reads.clone().try_acquire_owned() else {
            debug!("Read rejected: pool is closing");
            return rx;
        };

        let readers = readers.clone();
        tokio::spawn(async move {
            let result = guarded(execute_pooled_read(&readers, &op)).await;
            let _ = reply.send(result);
            drop(permit);
        });
        rx
    }

    fn enqueue(&self, job: Box<dyn WriterJob>) {
        let writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        match writer.as_ref() {
            // A failed send drops the job and with it the reply sender
            Some(tx) => {
                if tx.send(job).is_err() {
                    warn!("Writer task is gone; operation dropped");
                }
            }
            None => debug!("Operation rejected: pool is closed"),
        }
    }

    /// Stop accepting work, drain what is in flight, release the handles
    pub async fn close(&self) {
        let sender = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // Dropping the sender lets the writer finish its queue and exit
        drop(sender);

        if let Ok(all) = self.inflight_reads.acquire_many(READ_SLOTS).await {
            self.inflight_reads.close();
            drop(all);
        }

        if let Some(readers) = &self.readers {
            readers.close().await;
        }

        let task = self
            .writer_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(error = ?e, "Writer task failed");
            }
        }

        info!(location = %self.location, "Database closed");
    }
}

async fn connect_writer(config: &StoreConfig) -> Result<SqliteConnection, OpenError> {
    let options = match &config.db_path {
        Some(path) => SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout),
        None => SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|source| OpenError::Connect { path: None, source })?,
    };

    options
        .connect()
        .await
        .map_err(|source| OpenError::Connect {
            path: config.db_path.clone(),
            source,
        })
}

/// Persistent settings are applied only once the schema is known to be ours
async fn configure_writer(writer: &mut SqliteConnection, file_backed: bool) -> Result<(), sqlx::Error> {
    if file_backed {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&mut *writer)
            .await?;
    }
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *writer)
        .await?;
    Ok(())
}

async fn connect_readers(path: &Path, config: &StoreConfig) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(config.busy_timeout);

    SqlitePoolOptions::new()
        .max_connections(config.reader_connections.max(1))
        .connect_with(options)
        .await
}

async fn close_quietly(conn: SqliteConnection) {
    if let Err(e) = conn.close().await {
        warn!(error = %e, "Failed to close writer connection");
    }
}

/// Writer loop: strictly one job at a time, in submission order
async fn run_writer(
    mut conn: SqliteConnection,
    mut jobs: mpsc::UnboundedReceiver<Box<dyn WriterJob>>,
) {
    debug!("Writer task started");
    while let Some(job) = jobs.recv().await {
        job.run(&mut conn).await;
    }
    close_quietly(conn).await;
    debug!("Writer task stopped");
}

async fn execute_write<W: Write>(conn: &mut SqliteConnection, op: &W) -> Result<(), OperationError> {
    let mut tx = conn.begin().await?;
    match op.perform(&mut tx).await {
        Ok(()) => {
            tx.commit().await?;
            Ok(())
        }
        Err(err) => {
            if let Err(e) = tx.rollback().await {
                warn!(error = %e, "Rollback after failed write failed");
            }
            Err(err)
        }
    }
}

async fn execute_read<R: Read>(conn: &mut SqliteConnection, op: &R) -> Result<R::Output, OperationError> {
    let mut tx = conn.begin().await?;
    let result = op.perform(&mut tx).await;
    discard(tx).await;
    result
}

async fn execute_pooled_read<R: Read>(readers: &SqlitePool, op: &R) -> Result<R::Output, OperationError> {
    let mut tx = readers.begin().await?;
    let result = op.perform(&mut tx).await;
    discard(tx).await;
    result
}

/// Reads never commit
async fn discard(tx: Transaction<'_, Sqlite>) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "Rollback of read snapshot failed");
    }
}

/// Panic isolation: a panicking operation fails its caller, not the worker
async fn guarded<T, F>(future: F) -> Result<T, OperationError>
where
    F: Future<Output = Result<T, OperationError>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(panic_info) => {
            let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_info.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };

            error!(panic_msg = %panic_msg, "Operation panicked");
            Err(OperationError::Panicked(panic_msg))
        }
    }
}
