//! The connection pool.

use crate::config::PoolConfig;
use crate::settings::Settings;
use asupersync::{Cx, Outcome};
use sqlscope_core::{Connection, ConnectionFactory, Error, PoolErrorKind, Result};
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Process-unique identifier the pool assigns to every connection it opens.
pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total number of connections (active + idle)
    pub total_connections: usize,
    /// Number of idle connections
    pub idle_connections: usize,
    /// Number of active connections
    pub active_connections: usize,
    /// Number of pending acquire requests
    pub pending_requests: usize,
}

struct IdleConnection<C> {
    id: ConnectionId,
    conn: Arc<C>,
    created_at: Instant,
    idle_since: Instant,
}

struct PoolState<C> {
    idle: VecDeque<IdleConnection<C>>,
    active: usize,
}

struct PoolShared<C: Connection> {
    config: PoolConfig,
    factory: Box<dyn ConnectionFactory<C>>,
    state: Mutex<PoolState<C>>,
    /// One permit per connection that may be checked out at once.
    permits: Arc<Semaphore>,
    closed: AtomicBool,
    pending: AtomicUsize,
}

impl<C: Connection> PoolShared<C> {
    fn lock_state(&self) -> MutexGuard<'_, PoolState<C>> {
        // The state is plain bookkeeping; a panic while holding the lock leaves it usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn discard(&self, cx: &Cx, id: ConnectionId, conn: Arc<C>) {
        match Arc::try_unwrap(conn) {
            Ok(conn) => {
                if let Err(e) = conn.close(cx).await {
                    tracing::warn!(connection_id = id, error = %e, "error closing connection");
                }
            }
            Err(_) => {
                tracing::warn!(connection_id = id, "connection still referenced; dropping without close");
            }
        }
    }

    fn check_in(&self, id: ConnectionId, conn: Arc<C>, created_at: Instant) {
        let mut state = self.lock_state();
        state.active = state.active.saturating_sub(1);

        if self.is_closed() {
            tracing::debug!(connection_id = id, "pool closed; dropping returned connection");
            return;
        }
        if Arc::strong_count(&conn) > 1 {
            tracing::warn!(
                connection_id = id,
                "connection released while still referenced elsewhere; discarding instead of reusing"
            );
            return;
        }

        tracing::trace!(connection_id = id, "connection returned to pool");
        state.idle.push_back(IdleConnection {
            id,
            conn,
            created_at,
            idle_since: Instant::now(),
        });
    }
}

/// Counts a caller as pending for as long as it waits for a permit.
struct PendingGuard<'a>(&'a AtomicUsize);

impl<'a> PendingGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

fn closed_error() -> Error {
    Error::pool(PoolErrorKind::Closed, "connection pool is closed")
}

/// A bounded pool of reusable database connections.
///
/// The pool is an explicitly constructed value; clones share the same
/// connections, so the application's composition root builds one and hands
/// clones to whoever needs it. Capacity is enforced with an async semaphore,
/// so callers waiting for a connection suspend instead of blocking a thread.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::from_settings("settings.json", PgFactory::new())?;
/// let conn = pool.obtain(&cx).await?;
/// conn.execute(&cx, "SELECT 1", &[]).await?;
/// pool.release(conn);
/// pool.close(&cx).await?;
/// ```
pub struct Pool<C: Connection> {
    shared: Arc<PoolShared<C>>,
}

impl<C: Connection> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connection> fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.shared.config)
            .field("stats", &self.stats())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<C: Connection> Pool<C> {
    /// Create a new connection pool.
    ///
    /// No connection is opened until the first [`obtain`](Pool::obtain) or
    /// [`warm_up`](Pool::warm_up).
    pub fn new(config: PoolConfig, factory: impl ConnectionFactory<C>) -> Result<Self> {
        config.validate()?;
        let permits = Arc::new(Semaphore::new(config.max_connections));
        Ok(Self {
            shared: Arc::new(PoolShared {
                config,
                factory: Box::new(factory),
                state: Mutex::new(PoolState {
                    idle: VecDeque::new(),
                    active: 0,
                }),
                permits,
                closed: AtomicBool::new(false),
                pending: AtomicUsize::new(0),
            }),
        })
    }

    /// Create a pool sized by the `pool` section of a settings file.
    ///
    /// The factory is built by the caller, typically from
    /// [`Settings::connection`](crate::Settings::connection).
    pub fn from_settings(path: impl AsRef<Path>, factory: impl ConnectionFactory<C>) -> Result<Self> {
        let settings = Settings::from_file(path)?;
        Self::new(settings.pool, factory)
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Get the current pool statistics.
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock_state();
        PoolStats {
            total_connections: state.idle.len() + state.active,
            idle_connections: state.idle.len(),
            active_connections: state.active,
            pending_requests: self.shared.pending.load(Ordering::Relaxed),
        }
    }

    /// Check if every connection the pool may open is checked out.
    pub fn at_capacity(&self) -> bool {
        self.shared.permits.available_permits() == 0
    }

    /// Has [`close`](Pool::close) been called?
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Acquire a connection, waiting for one to be released if the pool is at capacity.
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn obtain(&self, cx: &Cx) -> Outcome<PooledConnection<C>, Error> {
        if self.is_closed() {
            return Outcome::Err(closed_error());
        }

        let permit = {
            let _pending = PendingGuard::new(&self.shared.pending);
            match Arc::clone(&self.shared.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return Outcome::Err(closed_error()),
            }
        };

        self.checkout(cx, permit).await
    }

    /// Acquire a connection without waiting.
    ///
    /// Fails with [`PoolErrorKind::Exhausted`] when every connection is checked out.
    pub async fn try_obtain(&self, cx: &Cx) -> Outcome<PooledConnection<C>, Error> {
        let permit = match Arc::clone(&self.shared.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                return Outcome::Err(Error::pool(
                    PoolErrorKind::Exhausted,
                    format!(
                        "all {} connections are in use",
                        self.shared.config.max_connections
                    ),
                ));
            }
            Err(TryAcquireError::Closed) => return Outcome::Err(closed_error()),
        };

        self.checkout(cx, permit).await
    }

    async fn checkout(
        &self,
        cx: &Cx,
        permit: OwnedSemaphorePermit,
    ) -> Outcome<PooledConnection<C>, Error> {
        loop {
            let candidate = self.shared.lock_state().idle.pop_back();
            let Some(idle) = candidate else {
                break;
            };

            if let Some(reason) = self
                .shared
                .config
                .expiry_reason(idle.created_at, idle.idle_since)
            {
                tracing::debug!(connection_id = idle.id, reason, "retiring idle connection");
                self.shared.discard(cx, idle.id, idle.conn).await;
                continue;
            }

            if self.shared.config.test_on_checkout && !idle.conn.is_valid(cx).await {
                tracing::warn!(connection_id = idle.id, "idle connection failed health check");
                self.shared.discard(cx, idle.id, idle.conn).await;
                continue;
            }

            self.shared.lock_state().active += 1;
            tracing::trace!(connection_id = idle.id, "reusing idle connection");
            return Outcome::Ok(PooledConnection {
                conn: Some(idle.conn),
                id: idle.id,
                created_at: idle.created_at,
                checked_out_at: Instant::now(),
                shared: Arc::clone(&self.shared),
                _permit: permit,
            });
        }

        let conn = match self.shared.factory.connect(cx).await {
            Outcome::Ok(conn) => conn,
            Outcome::Err(e) => return Outcome::Err(e),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };

        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        self.shared.lock_state().active += 1;
        tracing::debug!(connection_id = id, "opened new connection");
        Outcome::Ok(PooledConnection {
            conn: Some(Arc::new(conn)),
            id,
            created_at: now,
            checked_out_at: now,
            shared: Arc::clone(&self.shared),
            _permit: permit,
        })
    }

    /// Return a connection to the pool.
    ///
    /// Dropping a [`PooledConnection`] has the same effect; this method exists
    /// so release points read explicitly at call sites.
    pub fn release(&self, conn: PooledConnection<C>) {
        if !Arc::ptr_eq(&self.shared, &conn.shared) {
            tracing::warn!(
                connection_id = conn.id,
                "connection released to a pool it was not obtained from"
            );
        }
        drop(conn);
    }

    /// Open connections until `min_connections` are available.
    ///
    /// Returns how many connections were opened.
    pub async fn warm_up(&self, cx: &Cx) -> Outcome<usize, Error> {
        let mut opened = 0;
        loop {
            if self.is_closed() {
                return Outcome::Err(closed_error());
            }
            if self.stats().total_connections >= self.shared.config.min_connections {
                break;
            }
            let Ok(_permit) = Arc::clone(&self.shared.permits).try_acquire_owned() else {
                break;
            };

            let conn = match self.shared.factory.connect(cx).await {
                Outcome::Ok(conn) => conn,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            };
            let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
            let now = Instant::now();
            self.shared.lock_state().idle.push_back(IdleConnection {
                id,
                conn: Arc::new(conn),
                created_at: now,
                idle_since: now,
            });
            opened += 1;
        }

        tracing::debug!(opened, "pool warmed up");
        Outcome::Ok(opened)
    }

    /// Close the pool.
    ///
    /// Every waiter and every later [`obtain`](Pool::obtain) fails with
    /// [`PoolErrorKind::Closed`] and all idle connections are closed. If
    /// connections are still checked out the pool is closed anyway, those
    /// connections are dropped when they come back, and this call fails with
    /// [`PoolErrorKind::InUse`].
    #[tracing::instrument(level = "debug", skip(self, cx))]
    pub async fn close(&self, cx: &Cx) -> Result<()> {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.permits.close();

        let (idle, active) = {
            let mut state = self.shared.lock_state();
            (state.idle.drain(..).collect::<Vec<_>>(), state.active)
        };

        let closed = idle.len();
        for conn in idle {
            self.shared.discard(cx, conn.id, conn.conn).await;
        }
        tracing::debug!(closed, active, "connection pool closed");

        if active > 0 {
            return Err(Error::pool(
                PoolErrorKind::InUse,
                format!("pool closed while {active} connection(s) still in use"),
            ));
        }
        Ok(())
    }
}

/// A connection borrowed from the pool.
///
/// Dereferences to the underlying connection. The connection goes back to the
/// pool when this value is released or dropped, on every exit path.
pub struct PooledConnection<C: Connection> {
    conn: Option<Arc<C>>,
    id: ConnectionId,
    created_at: Instant,
    checked_out_at: Instant,
    shared: Arc<PoolShared<C>>,
    _permit: OwnedSemaphorePermit,
}

impl<C: Connection> PooledConnection<C> {
    /// The pool-assigned connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// A shared handle to the connection.
    ///
    /// Handles must not outlive this `PooledConnection`; one that does keeps the
    /// connection from being reused.
    pub fn connection(&self) -> &Arc<C> {
        self.conn.as_ref().expect("connection present until drop")
    }

    /// How long this connection has been checked out.
    pub fn checked_out_for(&self) -> Duration {
        self.checked_out_at.elapsed()
    }

    /// How long ago the connection was opened.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

impl<C: Connection> std::ops::Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        self.connection()
    }
}

impl<C: Connection> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("checked_out_for", &self.checked_out_for())
            .finish_non_exhaustive()
    }
}

impl<C: Connection> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.check_in(self.id, conn, self.created_at);
        }
        // The permit is released after this body, once the connection is idle again.
    }
}
