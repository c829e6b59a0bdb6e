//! Bounded connection pool.
//!
//! Capacity is a fair semaphore: waiters are served FIFO, one per release.
//! Idle connections never hold permits, so `|idle| + |in_use|` cannot
//! exceed the configured maximum. A connection returned in any state other
//! than `Ready` is reset in the background before it may be reused; if the
//! reset fails the connection is discarded and its capacity freed.

use crate::bolt::connection::BoltConnection;
use crate::config::{ConnectionConfig, DriverConfig};
use crate::errors::{Error, Result};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// How long `close` waits for in-use connections before forcing shutdown.
const CLOSE_GRACE: Duration = Duration::from_secs(10);

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub in_use: usize,
    pub max: usize,
}

pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    conn_config: ConnectionConfig,
    driver_config: DriverConfig,
    probe_statement: String,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<BoltConnection>>,
    in_use: AtomicUsize,
    closed: AtomicBool,
}

impl Pool {
    pub fn new(
        conn_config: ConnectionConfig,
        driver_config: DriverConfig,
        probe_statement: impl Into<String>,
    ) -> Self {
        let max = driver_config.max_pool_size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                conn_config,
                driver_config,
                probe_statement: probe_statement.into(),
                semaphore: Arc::new(Semaphore::new(max)),
                idle: Mutex::new(Vec::new()),
                in_use: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            idle: self.inner.idle.lock().map(|idle| idle.len()).unwrap_or(0),
            in_use: self.inner.in_use.load(Ordering::Relaxed),
            max: self.inner.driver_config.max_pool_size.max(1),
        }
    }

    /// Acquire a connection within the driver's default deadline.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        self.acquire_within(self.inner.driver_config.acquire_timeout)
            .await
    }

    /// Acquire a connection, waiting at most `deadline` for capacity.
    pub async fn acquire_within(&self, deadline: Duration) -> Result<PooledConnection> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::PoolClosed);
        }

        let started = Instant::now();
        let permit = tokio::time::timeout(
            deadline,
            self.inner.semaphore.clone().acquire_owned(),
        )
        .await
        .map_err(|_| Error::PoolTimeout {
            waited: started.elapsed(),
        })?
        .map_err(|_| Error::PoolClosed)?;

        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::PoolClosed);
        }

        // Prefer an idle connection; fall back to constructing a new one.
        loop {
            let candidate = self
                .inner
                .idle
                .lock()
                .map_err(|_| Error::PoolClosed)?
                .pop();
            let Some(mut conn) = candidate else { break };

            if self.vet(&mut conn).await {
                return Ok(PooledConnection::new(conn, self.inner.clone(), permit));
            }
            debug!(endpoint = %self.inner.conn_config.endpoint, "discarding non-viable idle connection");
            conn.close().await;
        }

        let conn =
            BoltConnection::connect(&self.inner.conn_config, &self.inner.driver_config).await?;
        Ok(PooledConnection::new(conn, self.inner.clone(), permit))
    }

    /// Bring an idle connection back to a trustworthy `Ready`: reset if it
    /// is not clean, probe if it has sat beyond the idle TTL.
    async fn vet(&self, conn: &mut BoltConnection) -> bool {
        if conn.is_defunct() {
            return false;
        }
        if conn.needs_reset() && conn.reset().await.is_err() {
            return false;
        }
        if conn.is_viable(self.inner.driver_config.idle_ttl) {
            return true;
        }
        conn.probe(&self.inner.probe_statement).await.is_ok()
    }

    /// Reject new acquisitions, wait for in-use connections (up to a grace
    /// period), then close every idle connection with GOODBYE.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.semaphore.close();
        info!(endpoint = %self.inner.conn_config.endpoint, "pool closing");

        let waited_from = Instant::now();
        while self.inner.in_use.load(Ordering::SeqCst) > 0 {
            if waited_from.elapsed() > CLOSE_GRACE {
                warn!("pool close grace period expired with connections still in use");
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        loop {
            let conn = match self.inner.idle.lock() {
                Ok(mut idle) => idle.pop(),
                Err(_) => None,
            };
            match conn {
                Some(mut conn) => conn.close().await,
                None => break,
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Clone for Pool {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("Pool")
            .field("endpoint", &self.inner.conn_config.endpoint)
            .field("stats", &stats)
            .finish()
    }
}

/// Exclusive ownership of one pooled connection. Dropping the guard
/// returns the connection to the pool (resetting it in the background when
/// it is not cleanly `Ready`).
pub struct PooledConnection {
    conn: Option<BoltConnection>,
    pool: Arc<PoolInner>,
    permit: Option<OwnedSemaphorePermit>,
}

impl PooledConnection {
    fn new(conn: BoltConnection, pool: Arc<PoolInner>, permit: OwnedSemaphorePermit) -> Self {
        pool.in_use.fetch_add(1, Ordering::SeqCst);
        Self {
            conn: Some(conn),
            pool,
            permit: Some(permit),
        }
    }
}

impl Deref for PooledConnection {
    type Target = BoltConnection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .unwrap_or_else(|| unreachable!("connection present until drop"))
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .unwrap_or_else(|| unreachable!("connection present until drop"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else { return };
        let permit = self.permit.take();
        self.pool.in_use.fetch_sub(1, Ordering::SeqCst);
        release(self.pool.clone(), conn, permit);
    }
}

fn release(pool: Arc<PoolInner>, mut conn: BoltConnection, permit: Option<OwnedSemaphorePermit>) {
    let closed = pool.closed.load(Ordering::SeqCst);

    if conn.is_defunct() {
        debug!(endpoint = %conn.endpoint(), "dropping defunct connection");
        drop(permit);
        return;
    }

    if !closed && !conn.needs_reset() {
        if let Ok(mut idle) = pool.idle.lock() {
            idle.push(conn);
        }
        // The permit is released only after the connection is parked, so
        // the woken waiter always finds it.
        drop(permit);
        return;
    }

    // Suspect (or pool-closing) connection: reset or say goodbye off the
    // caller's path. Without a runtime the connection is simply dropped.
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        drop(permit);
        return;
    };
    handle.spawn(async move {
        if closed {
            conn.close().await;
            drop(permit);
            return;
        }
        match conn.reset().await {
            Ok(()) => {
                debug!(endpoint = %conn.endpoint(), "connection reset and returned to pool");
                if let Ok(mut idle) = pool.idle.lock() {
                    idle.push(conn);
                }
            }
            Err(e) => {
                debug!(endpoint = %conn.endpoint(), "reset failed, discarding: {e}");
                conn.close().await;
            }
        }
        drop(permit);
    });
}
