//! Connection Pool
//!
//! Bounded pool of connections to a single endpoint.
//!
//! - Idle connections are kept oldest-first; acquisition takes the newest,
//!   eviction removes from the oldest end.
//! - `idle + active <= max_total` holds at all times. The state lock is held
//!   across the capacity check and creation of a new connection.
//! - Blocking acquisition waits on a notification sent whenever a release
//!   (or eviction, or replenish) leaves an idle connection or free capacity.
//! - A checked-out connection is owned by the caller until it is released.
//!   Closing the pool revokes active connections; a later release closes
//!   the connection and reports [`PoolError::Closed`].

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hostlink_core::{ConnectorSettings, Endpoint};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, ConnectionFactory, ConnectionId};
use crate::error::PoolError;

/// Upper bound on creation attempts while warming up a new pool
const MAX_WARM_UP_ATTEMPTS: usize = 10;

/// Pool sizing and timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Cached idle connections kept after release
    pub max_idle: usize,
    /// Idle plus active connections
    pub max_total: usize,
    /// Idle floor restored by [`ConnectionPool::replenish_idle`]
    pub min_idle: usize,
    pub idle_timeout: Duration,
    /// Wait between creation attempts after a failed create
    pub create_retry_interval: Duration,
    /// Pre-create `max_idle` connections when the pool is built
    pub warm_up: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from(&ConnectorSettings::default())
    }
}

impl From<&ConnectorSettings> for PoolConfig {
    fn from(settings: &ConnectorSettings) -> Self {
        Self {
            max_idle: settings.max_num_idle,
            max_total: settings.max_num_conn,
            min_idle: settings.min_num_idle,
            idle_timeout: settings.idle_timeout(),
            create_retry_interval: settings.create_retry_interval(),
            warm_up: true,
        }
    }
}

impl PoolConfig {
    pub fn max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    pub fn max_total(mut self, max_total: usize) -> Self {
        self.max_total = max_total;
        self
    }

    pub fn min_idle(mut self, min_idle: usize) -> Self {
        self.min_idle = min_idle;
        self
    }

    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn create_retry_interval(mut self, interval: Duration) -> Self {
        self.create_retry_interval = interval;
        self
    }

    pub fn warm_up(mut self, warm_up: bool) -> Self {
        self.warm_up = warm_up;
        self
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub idle: usize,
    pub active: usize,
    pub waiting: usize,
    pub max_idle: usize,
    pub max_total: usize,
    pub total_created: u64,
    pub total_closed: u64,
    pub closed: bool,
}

struct PoolState<C> {
    /// Ordered by `last_used`, oldest at the front
    idle: VecDeque<C>,
    active: HashSet<ConnectionId>,
    closed: bool,
    total_created: u64,
    total_closed: u64,
}

impl<C: Connection> PoolState<C> {
    fn new() -> Self {
        Self {
            idle: VecDeque::new(),
            active: HashSet::new(),
            closed: false,
            total_created: 0,
            total_closed: 0,
        }
    }

    fn total(&self) -> usize {
        self.idle.len() + self.active.len()
    }

    fn is_full(&self, max_total: usize) -> bool {
        self.total() >= max_total
    }

    fn has_idle(&self) -> bool {
        !self.idle.is_empty()
    }

    /// Move the most recently used idle connection to active
    fn take_idle(&mut self) -> Result<C, PoolError> {
        let connection = self.idle.pop_back().ok_or(PoolError::NoIdle)?;
        self.active.insert(connection.id());
        Ok(connection)
    }

    /// Stamping on insert keeps the deque ordered by `last_used`
    fn push_idle(&mut self, mut connection: C) {
        connection.core_mut().touch();
        self.idle.push_back(connection);
    }

    async fn close_connection(&mut self, mut connection: C) {
        connection.close().await;
        self.total_closed += 1;
    }
}

/// Decrements the waiter count even if the acquiring future is dropped
struct WaitGuard<'a>(&'a AtomicUsize);

impl<'a> WaitGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Pool of connections of type `C` to one endpoint
pub struct ConnectionPool<C: Connection> {
    name: String,
    endpoint: Arc<Endpoint>,
    factory: Arc<dyn ConnectionFactory<C>>,
    config: PoolConfig,
    state: Mutex<PoolState<C>>,
    available: Notify,
    waiting: AtomicUsize,
}

impl<C: Connection> ConnectionPool<C> {
    /// Build a pool and, when configured, warm it up to `max_idle`
    pub async fn new(
        factory: Arc<dyn ConnectionFactory<C>>,
        endpoint: Arc<Endpoint>,
        config: PoolConfig,
    ) -> Self {
        let name = format!("{}_{}", C::KIND, endpoint.id());
        info!(
            pool = %name,
            endpoint = %endpoint,
            max_idle = config.max_idle,
            max_total = config.max_total,
            "Creating connection pool"
        );

        let pool = Self {
            name,
            endpoint,
            factory,
            config,
            state: Mutex::new(PoolState::new()),
            available: Notify::new(),
            waiting: AtomicUsize::new(0),
        };
        if pool.config.warm_up {
            pool.warm_up().await;
        }
        pool
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Blocking acquire with no time limit
    pub async fn acquire(&self) -> Result<C, PoolError> {
        self.acquire_with(true, None).await
    }

    /// Fails with [`PoolError::Full`] instead of waiting
    pub async fn try_acquire(&self) -> Result<C, PoolError> {
        self.acquire_with(false, None).await
    }

    /// Blocking acquire bounded by `timeout`
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<C, PoolError> {
        self.acquire_with(true, Some(timeout)).await
    }

    /// Check out a connection.
    ///
    /// Prefers the most recently used idle connection, otherwise creates one
    /// while below `max_total`. When neither is possible a non-blocking call
    /// fails with [`PoolError::Full`]; a blocking call waits for a release,
    /// up to `timeout` when given ([`PoolError::AcquireTimeout`]).
    pub async fn acquire_with(
        &self,
        blocking: bool,
        timeout: Option<Duration>,
    ) -> Result<C, PoolError> {
        debug!(pool = %self.name, blocking, timeout = ?timeout, "Acquiring connection");
        let deadline = timeout.map(|budget| (Instant::now() + budget, budget));

        loop {
            // Registered before the state check so a release between the
            // check and the wait is not missed.
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let create_failed = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(PoolError::Closed);
                }

                if state.has_idle() {
                    let connection = state.take_idle()?;
                    debug!(
                        pool = %self.name,
                        connection = %connection.core(),
                        idle = state.idle.len(),
                        "Reusing idle connection"
                    );
                    return Ok(connection);
                }

                let create_failed = if state.is_full(self.config.max_total) {
                    false
                } else {
                    match self.new_connection(&mut state).await {
                        Some(connection) => {
                            state.active.insert(connection.id());
                            info!(
                                pool = %self.name,
                                connection = %connection.core(),
                                active = state.active.len(),
                                "Created connection"
                            );
                            return Ok(connection);
                        }
                        None => true,
                    }
                };

                if !blocking {
                    debug!(pool = %self.name, active = state.active.len(), "Pool is full");
                    return Err(PoolError::Full);
                }
                create_failed
            };

            let mut wait = match deadline {
                Some((deadline, budget)) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        warn!(pool = %self.name, timeout = ?budget, "Timed out acquiring connection");
                        return Err(PoolError::AcquireTimeout(budget));
                    }
                    Some(remaining)
                }
                None => None,
            };
            if create_failed {
                let retry = self.config.create_retry_interval;
                wait = Some(wait.map_or(retry, |remaining| remaining.min(retry)));
            }

            let _waiting = WaitGuard::enter(&self.waiting);
            match wait {
                Some(wait) => {
                    debug!(pool = %self.name, wait = ?wait, "Waiting for a connection");
                    let _ = tokio::time::timeout(wait, notified).await;
                }
                None => {
                    debug!(pool = %self.name, "Waiting for a connection");
                    notified.await;
                }
            }
        }
    }

    /// Return a checked-out connection.
    ///
    /// Unavailable connections are closed and, when the pool has neither an
    /// idle connection nor is full, replaced by a fresh idle one. Healthy
    /// connections are cached unless the idle list is at `max_idle`.
    pub async fn release(&self, connection: C) -> Result<(), PoolError> {
        debug!(pool = %self.name, connection = %connection.core(), "Releasing connection");
        let mut state = self.state.lock().await;

        if state.closed {
            debug!(pool = %self.name, connection = %connection.core(), "Pool closed, closing released connection");
            state.close_connection(connection).await;
            return Err(PoolError::Closed);
        }

        if !state.active.remove(&connection.id()) {
            warn!(
                pool = %self.name,
                connection = %connection.core(),
                "Released connection was not checked out from this pool"
            );
        }

        if !connection.is_available().await {
            info!(pool = %self.name, connection = %connection.core(), "Released connection is unavailable");
            state.close_connection(connection).await;
            if !state.has_idle() && !state.is_full(self.config.max_total) {
                if let Some(replacement) = self.new_connection(&mut state).await {
                    state.push_idle(replacement);
                }
            }
        } else if state.is_full(self.config.max_total) || state.idle.len() >= self.config.max_idle {
            debug!(pool = %self.name, connection = %connection.core(), "Idle list full, closing connection");
            state.close_connection(connection).await;
        } else {
            state.push_idle(connection);
        }

        if state.has_idle() || !state.is_full(self.config.max_total) {
            self.available.notify_one();
        }
        Ok(())
    }

    /// Close idle connections, revoke active ones and wake all waiters.
    /// Idempotent.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        info!(
            pool = %self.name,
            idle = state.idle.len(),
            active = state.active.len(),
            "Closing connection pool"
        );

        state.closed = true;
        while let Some(connection) = state.idle.pop_front() {
            state.close_connection(connection).await;
        }
        state.active.clear();
        drop(state);

        self.available.notify_waiters();
    }

    /// Close idle connections unused for at least `idle_timeout`
    pub async fn evict_idle(&self) -> usize {
        let mut state = self.state.lock().await;
        if state.closed {
            return 0;
        }

        let now = Instant::now();
        let mut evicted = 0;
        while state
            .idle
            .front()
            .is_some_and(|c| c.core().idle_for(now) >= self.config.idle_timeout)
        {
            if let Some(connection) = state.idle.pop_front() {
                debug!(pool = %self.name, connection = %connection.core(), "Evicting idle connection");
                state.close_connection(connection).await;
                evicted += 1;
            }
        }

        if evicted > 0 {
            info!(pool = %self.name, evicted, idle = state.idle.len(), "Evicted idle connections");
            self.available.notify_one();
        }
        evicted
    }

    /// Create idle connections until `min_idle` is reached or the pool is full
    pub async fn replenish_idle(&self) -> usize {
        let mut state = self.state.lock().await;
        if state.closed {
            return 0;
        }

        let mut created = 0;
        while state.idle.len() < self.config.min_idle && !state.is_full(self.config.max_total) {
            match self.new_connection(&mut state).await {
                Some(connection) => {
                    state.push_idle(connection);
                    created += 1;
                }
                None => break,
            }
        }

        if created > 0 {
            debug!(pool = %self.name, created, "Replenished idle connections");
            self.available.notify_one();
        }
        created
    }

    /// Periodically evict and replenish until the pool is closed or dropped
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let pool = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                if pool.is_closed().await {
                    debug!(pool = %pool.name, "Pool closed, stopping reaper");
                    break;
                }
                pool.evict_idle().await;
                pool.replenish_idle().await;
            }
        })
    }

    /// `idle + active >= max_total`
    pub async fn is_full(&self) -> bool {
        self.state.lock().await.is_full(self.config.max_total)
    }

    pub async fn has_idle(&self) -> bool {
        self.state.lock().await.has_idle()
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        PoolStats {
            idle: state.idle.len(),
            active: state.active.len(),
            waiting: self.waiting.load(Ordering::Relaxed),
            max_idle: self.config.max_idle,
            max_total: self.config.max_total,
            total_created: state.total_created,
            total_closed: state.total_closed,
            closed: state.closed,
        }
    }

    async fn warm_up(&self) {
        let mut state = self.state.lock().await;
        let target = self.config.max_idle.min(self.config.max_total);

        let mut attempts = 0;
        while state.idle.len() < target && attempts < MAX_WARM_UP_ATTEMPTS {
            attempts += 1;
            if let Some(connection) = self.new_connection(&mut state).await {
                state.push_idle(connection);
            }
        }

        if state.idle.len() < target {
            warn!(
                pool = %self.name,
                idle = state.idle.len(),
                target,
                "Warm-up created fewer connections than requested"
            );
        } else {
            debug!(pool = %self.name, idle = state.idle.len(), "Pool warmed up");
        }
    }

    /// Create a connection and check it is usable; counts towards stats
    async fn new_connection(&self, state: &mut PoolState<C>) -> Option<C> {
        match self.factory.create(Arc::clone(&self.endpoint)).await {
            Ok(connection) => {
                state.total_created += 1;
                if connection.is_available().await {
                    Some(connection)
                } else {
                    warn!(pool = %self.name, connection = %connection.core(), "New connection is unavailable");
                    state.close_connection(connection).await;
                    None
                }
            }
            Err(e) => {
                error!(pool = %self.name, error = %e, "Failed to create connection");
                None
            }
        }
    }
}
