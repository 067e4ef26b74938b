//! Operation protocol.
//!
//! [`Read`] and [`Write`] are the only sanctioned way to touch the database.
//! The pool decides which connection an operation runs on and wraps it in a
//! transaction: a write is committed only if `perform` succeeds, a read is
//! always rolled back, so a read can never leave a trace and a failing write
//! never leaves a partial one.
//!
//! Composite reads (several queries decoded into one value) must be written as
//! a single [`Read`]; everything inside one `perform` call sees one snapshot.

use crate::error::OperationError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::SqliteConnection;
use std::marker::PhantomData;

/// Side-effect free unit of work producing a value from a consistent snapshot
#[async_trait]
pub trait Read: Send + Sync + 'static {
    type Output: Send + 'static;

    async fn perform(&self, snapshot: &mut SqliteConnection) -> Result<Self::Output, OperationError>;
}

/// Mutating unit of work executed on the single writer connection
#[async_trait]
pub trait Write: Send + Sync + 'static {
    async fn perform(&self, writer: &mut SqliteConnection) -> Result<(), OperationError>;
}

/// [`Read`] backed by a closure, see [`read_fn`]
pub struct ReadFn<F, T> {
    f: F,
    _output: PhantomData<fn() -> T>,
}

/// Lift a closure into a [`Read`]
///
/// ```text
/// let count = read_fn(|db| Box::pin(async move {
///     let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events").fetch_one(&mut *db).await?;
///     Ok(n)
/// }));
/// ```
pub fn read_fn<F, T>(f: F) -> ReadFn<F, T>
where
    F: for<'c> Fn(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, OperationError>>
        + Send
        + Sync
        + 'static,
    T: Send + 'static,
{
    ReadFn {
        f,
        _output: PhantomData,
    }
}

#[async_trait]
impl<F, T> Read for ReadFn<F, T>
where
    F: for<'c> Fn(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, OperationError>>
        + Send
        + Sync
        + 'static,
    T: Send + 'static,
{
    type Output = T;

    async fn perform(&self, snapshot: &mut SqliteConnection) -> Result<T, OperationError> {
        (self.f)(snapshot).await
    }
}

/// [`Write`] backed by a closure, see [`write_fn`]
pub struct WriteFn<F> {
    f: F,
}

/// Lift a closure into a [`Write`]
pub fn write_fn<F>(f: F) -> WriteFn<F>
where
    F: for<'c> Fn(&'c mut SqliteConnection) -> BoxFuture<'c, Result<(), OperationError>>
        + Send
        + Sync
        + 'static,
{
    WriteFn { f }
}

#[async_trait]
impl<F> Write for WriteFn<F>
where
    F: for<'c> Fn(&'c mut SqliteConnection) -> BoxFuture<'c, Result<(), OperationError>>
        + Send
        + Sync
        + 'static,
{
    async fn perform(&self, writer: &mut SqliteConnection) -> Result<(), OperationError> {
        (self.f)(writer).await
    }
}
