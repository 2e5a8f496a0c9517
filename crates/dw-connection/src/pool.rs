//! Bounded, keyed connection pools.
//!
//! One pool per server name, bounded to [`POOL_MAX_SIZE`] connections.
//! Checkouts beyond the bound wait (bounded) for a release; idle
//! connections are health-checked on checkout and replaced transparently
//! at most once. The registry holds one lock for the name-to-pool map and
//! each pool holds its own, so traffic to unrelated servers is never
//! serialized through a shared choke point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;

use crate::error::{ConnectionError, ConnectionResult};
use crate::profile::ServerProfile;

/// Minimum pool size.
pub const POOL_MIN_SIZE: usize = 1;

/// Maximum simultaneously live connections per server.
pub const POOL_MAX_SIZE: usize = 10;

/// Seam between the pool and connection establishment, so pool semantics
/// are testable without a directory server.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The connection type this factory produces.
    type Conn: Send + 'static;

    /// Establishes a new authenticated connection for the profile.
    async fn establish(&self, profile: &ServerProfile) -> ConnectionResult<Self::Conn>;

    /// Round-trip health check; `false` means the connection is stale.
    async fn probe(&self, conn: &mut Self::Conn) -> bool;

    /// Closes a connection.
    async fn close(&self, conn: Self::Conn);
}

/// Pool tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Upper bound on simultaneously live connections, clamped to
    /// `[POOL_MIN_SIZE, POOL_MAX_SIZE]`.
    pub max_size: usize,

    /// How long a checkout waits for capacity before `PoolExhausted`.
    pub checkout_timeout: Duration,

    /// Idle connections younger than this skip the health probe on
    /// checkout.
    pub idle_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: POOL_MAX_SIZE,
            checkout_timeout: Duration::from_secs(5),
            idle_grace: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    fn clamped_max(&self) -> usize {
        self.max_size.clamp(POOL_MIN_SIZE, POOL_MAX_SIZE)
    }
}

/// Lifecycle of one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// No connection has been established yet.
    Empty,
    /// At least one connection has been established.
    Warm,
    /// Close requested; in-flight checkouts may finish, new ones are
    /// refused.
    Draining,
    /// All connections closed.
    Closed,
}

struct IdleConn<C> {
    conn: C,
    checked_at: Instant,
}

struct PoolInner<F: ConnectionFactory> {
    profile: ServerProfile,
    factory: Arc<F>,
    config: PoolConfig,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<IdleConn<F::Conn>>>,
    state: Mutex<PoolState>,
    in_use: AtomicUsize,
}

impl<F: ConnectionFactory> PoolInner<F> {
    fn state(&self) -> PoolState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: PoolState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = next;
    }

    fn ensure_open(&self) -> ConnectionResult<()> {
        match self.state() {
            PoolState::Draining | PoolState::Closed => {
                Err(ConnectionError::PoolClosed(self.profile.name.clone()))
            }
            PoolState::Empty | PoolState::Warm => Ok(()),
        }
    }

    /// Called when a checked-out connection finishes its cycle.
    fn checkout_finished(&self) {
        let remaining = self.in_use.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 && self.state() == PoolState::Draining {
            self.set_state(PoolState::Closed);
            tracing::debug!(server = %self.profile.name, "pool drained and closed");
        }
    }
}

/// Bounded pool of live connections to one server.
///
/// Cheap to clone; clones share the same pool.
pub struct ConnectionPool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> Clone for ConnectionPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Creates an empty pool for the given profile.
    #[must_use]
    pub fn new(profile: ServerProfile, factory: Arc<F>, config: PoolConfig) -> Self {
        let max = config.clamped_max();
        Self {
            inner: Arc::new(PoolInner {
                profile,
                factory,
                config,
                semaphore: Arc::new(Semaphore::new(max)),
                idle: Mutex::new(Vec::new()),
                state: Mutex::new(PoolState::Empty),
                in_use: AtomicUsize::new(0),
            }),
        }
    }

    /// Returns the server name this pool serves.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.inner.profile.name
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PoolState {
        self.inner.state()
    }

    /// Checks out a connection, establishing one lazily if no healthy
    /// idle connection exists.
    ///
    /// Blocks up to the configured checkout timeout when the pool is at
    /// capacity, then fails with `PoolExhausted`. A stale idle connection
    /// is discarded and replaced transparently exactly once; a failure of
    /// the replacement attempt propagates. Abandoning the returned future
    /// while waiting leaks nothing.
    pub async fn checkout(&self) -> ConnectionResult<PooledConnection<F>> {
        let inner = &self.inner;
        inner.ensure_open()?;

        let permit = match timeout(
            inner.config.checkout_timeout,
            inner.semaphore.clone().acquire_owned(),
        )
        .await
        {
            Err(_) => return Err(ConnectionError::PoolExhausted),
            // Semaphore closed by a concurrent drain.
            Ok(Err(_)) => return Err(ConnectionError::PoolClosed(inner.profile.name.clone())),
            Ok(Ok(permit)) => permit,
        };
        // The pool may have started draining while we waited.
        inner.ensure_open()?;

        let conn = match self.take_healthy_idle().await {
            TakeIdle::Healthy(conn) => conn,
            TakeIdle::Stale => {
                // One transparent replacement; its failure propagates.
                inner.factory.establish(&inner.profile).await?
            }
            TakeIdle::None => inner.factory.establish(&inner.profile).await?,
        };

        if inner.state() == PoolState::Empty {
            inner.set_state(PoolState::Warm);
        }
        inner.in_use.fetch_add(1, Ordering::AcqRel);
        Ok(PooledConnection {
            conn: Some(conn),
            _permit: Some(permit),
            pool: inner.clone(),
        })
    }

    /// Drains the pool: no new checkouts, existing checkouts finish,
    /// idle connections are closed now.
    pub async fn close(&self) {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if matches!(*state, PoolState::Closed) {
                return;
            }
            *state = if inner.in_use.load(Ordering::Acquire) == 0 {
                PoolState::Closed
            } else {
                PoolState::Draining
            };
        }
        // Wake blocked waiters so they observe the drain.
        inner.semaphore.close();

        let drained: Vec<IdleConn<F::Conn>> = {
            let mut idle = inner.idle.lock().unwrap_or_else(|e| e.into_inner());
            idle.drain(..).collect()
        };
        for idle in drained {
            inner.factory.close(idle.conn).await;
        }
        tracing::debug!(server = %inner.profile.name, state = ?inner.state(), "pool close requested");
    }

    async fn take_healthy_idle(&self) -> TakeIdle<F::Conn> {
        let inner = &self.inner;
        let idle = {
            let mut guard = inner.idle.lock().unwrap_or_else(|e| e.into_inner());
            guard.pop()
        };
        let Some(idle) = idle else {
            return TakeIdle::None;
        };

        if idle.checked_at.elapsed() <= inner.config.idle_grace {
            return TakeIdle::Healthy(idle.conn);
        }

        let mut conn = idle.conn;
        if inner.factory.probe(&mut conn).await {
            TakeIdle::Healthy(conn)
        } else {
            tracing::warn!(server = %inner.profile.name, "discarding stale pooled connection");
            inner.factory.close(conn).await;
            TakeIdle::Stale
        }
    }
}

enum TakeIdle<C> {
    Healthy(C),
    Stale,
    None,
}

/// A connection checked out of a pool.
///
/// Grants exclusive use until released; dropping it returns the
/// connection to its pool. Never store one beyond a single
/// request-use-release cycle.
pub struct PooledConnection<F: ConnectionFactory> {
    conn: Option<F::Conn>,
    _permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    /// Returns the owning server name.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.pool.profile.name
    }

    /// Returns the underlying connection.
    #[must_use]
    pub fn conn_mut(&mut self) -> &mut F::Conn {
        self.conn.as_mut().expect("connection already released")
    }

    /// Returns the connection to the pool.
    pub fn release(self) {
        // Drop does the work; this exists so call sites read explicitly.
        drop(self);
    }

    /// Closes the connection instead of returning it to the pool.
    ///
    /// Use when the connection's state no longer matches the pool, e.g.
    /// after binding as a different identity.
    pub async fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.factory.close(conn).await;
        }
        // Drop still runs for permit release and accounting.
    }
}

// Hand-written so `F::Conn` need not be `Debug`.
impl<F: ConnectionFactory> std::fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("server", &self.pool.profile.name)
            .finish_non_exhaustive()
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            match self.pool.state() {
                PoolState::Empty | PoolState::Warm => {
                    let mut idle = self.pool.idle.lock().unwrap_or_else(|e| e.into_inner());
                    idle.push(IdleConn {
                        conn,
                        checked_at: Instant::now(),
                    });
                }
                PoolState::Draining | PoolState::Closed => {
                    // Closing needs async; hand it to the runtime if one
                    // is still around, otherwise let the transport drop.
                    if let Ok(handle) = tokio::runtime::Handle::try_current() {
                        let factory = self.pool.factory.clone();
                        handle.spawn(async move { factory.close(conn).await });
                    }
                }
            }
        }
        self.pool.checkout_finished();
    }
}

/// Process-wide map from server name to pool.
///
/// Pools are created on first checkout for a name and destroyed when the
/// caller closes them (e.g. the operator deselects the server) or at
/// shutdown via [`close_all`](Self::close_all).
pub struct PoolRegistry<F: ConnectionFactory> {
    factory: Arc<F>,
    config: PoolConfig,
    pools: RwLock<HashMap<String, ConnectionPool<F>>>,
}

impl<F: ConnectionFactory> PoolRegistry<F> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(factory: Arc<F>, config: PoolConfig) -> Self {
        Self {
            factory,
            config,
            pools: RwLock::new(HashMap::new()),
        }
    }

    /// Checks out a connection from the profile's pool, creating the
    /// pool on first use.
    pub async fn checkout(&self, profile: &ServerProfile) -> ConnectionResult<PooledConnection<F>> {
        let pool = self.pool_for(profile);
        pool.checkout().await
    }

    /// Closes and removes the pool for a server name, if one exists.
    pub async fn close_pool(&self, server_name: &str) {
        let removed = {
            let mut pools = self.pools.write().unwrap_or_else(|e| e.into_inner());
            pools.remove(server_name)
        };
        if let Some(pool) = removed {
            pool.close().await;
        }
    }

    /// Closes and removes every pool.
    pub async fn close_all(&self) {
        let drained: Vec<ConnectionPool<F>> = {
            let mut pools = self.pools.write().unwrap_or_else(|e| e.into_inner());
            pools.drain().map(|(_, pool)| pool).collect()
        };
        for pool in drained {
            pool.close().await;
        }
    }

    /// Returns the number of live pools.
    #[must_use]
    pub fn pool_count(&self) -> usize {
        self.pools.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Checks whether a pool exists for the server name.
    #[must_use]
    pub fn contains(&self, server_name: &str) -> bool {
        self.pools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(server_name)
    }

    fn pool_for(&self, profile: &ServerProfile) -> ConnectionPool<F> {
        {
            let pools = self.pools.read().unwrap_or_else(|e| e.into_inner());
            if let Some(pool) = pools.get(&profile.name) {
                return pool.clone();
            }
        }
        let mut pools = self.pools.write().unwrap_or_else(|e| e.into_inner());
        pools
            .entry(profile.name.clone())
            .or_insert_with(|| {
                ConnectionPool::new(profile.clone(), self.factory.clone(), self.config)
            })
            .clone()
    }
}
