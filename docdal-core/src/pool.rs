//! Bounded connection checkout.
//!
//! Backends hand the pool a cloneable connection handle (a driver database handle, a
//! shared in-memory state). The pool bounds how many operations hold it at once and
//! returns a [`PooledConnection`] guard that releases its slot when dropped, on every
//! exit path.

use std::{
    fmt,
    ops::Deref,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

use crate::{
    config::PoolConfig,
    error::{DalError, DalResult},
};

/// A semaphore-bounded pool around a shared connection handle.
///
/// # Example
///
/// ```ignore
/// let pool = ConnectionPool::new(database, PoolConfig::default().max_size(4));
///
/// let conn = pool.acquire().await?;
/// conn.collection::<Document>("users").count_documents(doc! {}).await?;
/// // Returned to the pool here.
/// drop(conn);
/// ```
pub struct ConnectionPool<C> {
    connection: C,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    checked_out: Arc<AtomicUsize>,
    total_acquired: AtomicUsize,
}

impl<C: Clone> ConnectionPool<C> {
    /// Creates a pool handing out clones of `connection`.
    pub fn new(connection: C, config: PoolConfig) -> Self {
        Self {
            connection,
            permits: Arc::new(Semaphore::new(config.max_size.max(1))),
            config,
            checked_out: Arc::new(AtomicUsize::new(0)),
            total_acquired: AtomicUsize::new(0),
        }
    }

    /// Checks out a connection, waiting for a free slot.
    ///
    /// # Errors
    ///
    /// - [`DalError::Timeout`] if no slot frees up within the configured acquire timeout.
    /// - [`DalError::StorageOperationFailed`] if the pool has been closed.
    pub async fn acquire(&self) -> DalResult<PooledConnection<C>> {
        let permit = self.permits.clone().acquire_owned();

        let permit = match self.config.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, permit)
                .await
                .map_err(|_| DalError::Timeout { operation: "acquire", limit })?,
            None => permit.await,
        }
        .map_err(|_| DalError::StorageOperationFailed("connection pool is closed".to_string()))?;

        let active = self.checked_out.fetch_add(1, Ordering::SeqCst) + 1;
        self.total_acquired.fetch_add(1, Ordering::SeqCst);
        trace!(active, "connection checked out");

        Ok(PooledConnection {
            connection: self.connection.clone(),
            checked_out: Arc::clone(&self.checked_out),
            _permit: permit,
        })
    }

    /// Stops handing out connections. Pending and future acquisitions fail; connections
    /// already checked out stay usable until dropped.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// The underlying connection handle, without checking it out.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    /// The pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of connections currently checked out.
    pub fn checked_out(&self) -> usize {
        self.checked_out.load(Ordering::SeqCst)
    }

    /// Number of successful checkouts since the pool was created.
    pub fn total_acquired(&self) -> usize {
        self.total_acquired.load(Ordering::SeqCst)
    }
}

impl<C> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .field("checked_out", &self.checked_out.load(Ordering::SeqCst))
            .field("closed", &self.permits.is_closed())
            .finish()
    }
}

/// RAII guard for a checked-out connection.
///
/// Dereferences to the connection; its pool slot is released on drop.
pub struct PooledConnection<C> {
    connection: C,
    checked_out: Arc<AtomicUsize>,
    _permit: OwnedSemaphorePermit,
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.connection
    }
}

impl<C> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        let active = self.checked_out.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        trace!(active, "connection released");
    }
}

impl<C: fmt::Debug> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PooledConnection").field(&self.connection).finish()
    }
}
