//! Persistence service façade.
//!
//! Opens (and migrates) the store once, then schedules [`Read`] and [`Write`]
//! operations on the [`ConnectionPool`]. Every call returns an
//! [`OperationHandle`] that resolves exactly once; the work is queued at call
//! time, so two writes submitted one after the other run in that order even if
//! their handles are awaited the other way round.
//!
//! State machine: `Uninitialized → Migrating → Ready`, or `→ Failed` when the
//! open or a migration fails. `Failed` is terminal: every later call resolves
//! immediately with [`PersistenceError::Unavailable`] without touching disk.

use crate::connection::{ConnectionPool, Reply};
use crate::error::{OpenError, PersistenceError};
use crate::migration::{MigrationRegistry, MigrationReport};
use crate::operation::{Read, Write};
use fosdem_core::StoreConfig;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, error, info};

/// Lifecycle of a [`PersistenceService`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    Migrating,
    Ready,
    /// Open or migration failed (terminal)
    Failed,
    /// `close()` was called
    Closed,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Uninitialized => write!(f, "UNINITIALIZED"),
            ServiceState::Migrating => write!(f, "MIGRATING"),
            ServiceState::Ready => write!(f, "READY"),
            ServiceState::Failed => write!(f, "FAILED"),
            ServiceState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Pending result of a scheduled operation
///
/// Dropping the handle does not cancel the operation.
#[must_use = "the operation runs regardless; await the handle to observe its result"]
pub struct OperationHandle<T> {
    state: HandleState<T>,
}

enum HandleState<T> {
    Pending(Reply<T>),
    Resolved(Option<PersistenceError>),
}

impl<T> OperationHandle<T> {
    fn pending(reply: Reply<T>) -> Self {
        Self {
            state: HandleState::Pending(reply),
        }
    }

    fn failed(err: PersistenceError) -> Self {
        Self {
            state: HandleState::Resolved(Some(err)),
        }
    }
}

impl<T> Future for OperationHandle<T> {
    type Output = Result<T, PersistenceError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            HandleState::Pending(reply) => Pin::new(reply).poll(cx).map(|received| match received {
                Ok(result) => result.map_err(PersistenceError::from),
                // Reply sender dropped without an answer: the pool shut down
                Err(_) => Err(PersistenceError::Closed),
            }),
            HandleState::Resolved(err) => {
                Poll::Ready(Err(err.take().unwrap_or(PersistenceError::Closed)))
            }
        }
    }
}

/// Thread-safe façade over the store
pub struct PersistenceService {
    pool: Result<ConnectionPool, Arc<OpenError>>,
    report: MigrationReport,
    closed: AtomicBool,
}

impl PersistenceService {
    /// Open the store described by `config` and apply `registry`.
    ///
    /// Never fails outright: a failed open yields a service in
    /// [`ServiceState::Failed`] that reports the error through
    /// [`open_error`](Self::open_error) and every operation.
    pub async fn open(config: &StoreConfig, registry: &MigrationRegistry) -> Self {
        let mut state = ServiceState::Uninitialized;
        debug!(state = %state, "Persistence service created");

        state = transition(state, ServiceState::Migrating);
        match ConnectionPool::open(config, registry).await {
            Ok((pool, report)) => {
                transition(state, ServiceState::Ready);
                info!(
                    location = %pool.location(),
                    version = report.current_version,
                    applied = report.applied.len(),
                    "Persistence service ready"
                );
                Self {
                    pool: Ok(pool),
                    report,
                    closed: AtomicBool::new(false),
                }
            }
            Err(err) => {
                transition(state, ServiceState::Failed);
                error!(error = %err, "Persistence service failed to open");
                Self {
                    pool: Err(Arc::new(err)),
                    report: MigrationReport::default(),
                    closed: AtomicBool::new(false),
                }
            }
        }
    }

    /// Like [`open`](Self::open), but hand back the error instead of a failed service
    pub async fn try_open(config: &StoreConfig, registry: &MigrationRegistry) -> Result<Self, Arc<OpenError>> {
        let service = Self::open(config, registry).await;
        match &service.pool {
            Ok(_) => Ok(service),
            Err(err) => Err(err.clone()),
        }
    }

    pub fn state(&self) -> ServiceState {
        match &self.pool {
            Err(_) => ServiceState::Failed,
            Ok(_) if self.closed.load(Ordering::Acquire) => ServiceState::Closed,
            Ok(_) => ServiceState::Ready,
        }
    }

    pub fn open_error(&self) -> Option<&OpenError> {
        self.pool.as_ref().err().map(|err| err.as_ref())
    }

    /// Migrations applied while opening (empty on a reopen)
    pub fn migration_report(&self) -> &MigrationReport {
        &self.report
    }

    fn ready_pool(&self) -> Result<&ConnectionPool, PersistenceError> {
        match &self.pool {
            Err(err) => Err(PersistenceError::Unavailable(err.clone())),
            Ok(_) if self.closed.load(Ordering::Acquire) => Err(PersistenceError::Closed),
            Ok(pool) => Ok(pool),
        }
    }

    /// Schedule `op` against a consistent snapshot
    pub fn perform_read<R: Read>(&self, op: R) -> OperationHandle<R::Output> {
        match self.ready_pool() {
            Ok(pool) => {
                debug!(operation = std::any::type_name::<R>(), "Scheduling read");
                OperationHandle::pending(pool.submit_read(op))
            }
            Err(err) => OperationHandle::failed(err),
        }
    }

    /// Schedule `op` on the writer, after every previously scheduled write
    pub fn perform_write<W: Write>(&self, op: W) -> OperationHandle<()> {
        match self.ready_pool() {
            Ok(pool) => {
                debug!(operation = std::any::type_name::<W>(), "Scheduling write");
                OperationHandle::pending(pool.submit_write(op))
            }
            Err(err) => OperationHandle::failed(err),
        }
    }

    /// Callback form of [`perform_read`](Self::perform_read); `completion`
    /// runs exactly once on a runtime task
    pub fn perform_read_with<R, F>(&self, op: R, completion: F)
    where
        R: Read,
        F: FnOnce(Result<R::Output, PersistenceError>) + Send + 'static,
    {
        let handle = self.perform_read(op);
        tokio::spawn(async move { completion(handle.await) });
    }

    /// Callback form of [`perform_write`](Self::perform_write); `completion`
    /// receives `None` on success
    pub fn perform_write_with<W, F>(&self, op: W, completion: F)
    where
        W: Write,
        F: FnOnce(Option<PersistenceError>) + Send + 'static,
    {
        let handle = self.perform_write(op);
        tokio::spawn(async move { completion(handle.await.err()) });
    }

    /// Drain in-flight operations and release the database handles
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(pool) = &self.pool {
            pool.close().await;
        }
        info!("Persistence service closed");
    }
}

fn transition(from: ServiceState, to: ServiceState) -> ServiceState {
    debug!(from = %from, to = %to, "Persistence service state change");
    to
}
