//! Per-provider connection pool
//!
//! A bounded set of live sessions for one provider. Capacity is enforced
//! twice: by the pool's own semaphore and by a [`PrioritySemaphore`] that may
//! be shared with other pools, so a global ceiling can be applied across
//! providers without the pools knowing about each other.
//!
//! Idle sessions are reused newest-first. A background sweep, running at
//! half the idle timeout, destroys sessions that sat unused for longer than
//! the timeout; acquire also skips and destroys expired sessions it finds.
//!
//! # Example
//!
//! ```no_run
//! use nntp_stream::{ConnectionPool, PoolConfig, Priority, PrioritySemaphore, ProviderConfig,
//!     RequestContext, TcpConnectionFactory};
//! use std::sync::Arc;
//!
//! # async fn example() -> nntp_stream::Result<()> {
//! let provider = Arc::new(ProviderConfig::tls("news.example.com", "user", "pass"));
//! let gate = PrioritySemaphore::new(provider.max_connections, 80);
//! let pool = ConnectionPool::new(
//!     TcpConnectionFactory::new(provider.clone()),
//!     PoolConfig::new(provider.server_id(), provider.max_connections),
//!     gate,
//! );
//!
//! let ctx = RequestContext::new();
//! let mut lock = pool.acquire(Priority::High, &ctx).await?;
//! let stat = lock.stat("part1of10@example").await?;
//! drop(lock); // returned to the idle stack
//! # let _ = stat;
//! pool.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::connection::{ArticleConnection, ConnectionFactory};
use crate::context::{Priority, RequestContext, UsageContext};
use crate::error::{NntpError, Result};
use crate::gate::{GatePermit, PrioritySemaphore};
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Default idle timeout before a pooled session is closed
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Pool construction parameters
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Name used in logs (usually `host:port`)
    pub name: String,
    /// Maximum live sessions
    pub max_connections: usize,
    /// Idle sessions older than this are destroyed
    pub idle_timeout: Duration,
}

impl PoolConfig {
    /// Config with the default idle timeout
    pub fn new(name: impl Into<String>, max_connections: usize) -> Self {
        Self {
            name: name.into(),
            max_connections,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Set the idle timeout
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

/// Point-in-time counts of one pool
///
/// `active + idle == live <= max` holds for every snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
    /// Sessions that exist (borrowed or idle)
    pub live: usize,
    /// Sessions waiting in the idle stack
    pub idle: usize,
    /// Sessions currently borrowed
    pub active: usize,
    /// Pool capacity
    pub max: usize,
    /// Borrowed sessions per usage tag
    pub usage: BTreeMap<UsageContext, usize>,
}

impl PoolSnapshot {
    /// Capacity not currently borrowed
    pub fn available(&self) -> usize {
        self.max.saturating_sub(self.active)
    }
}

/// Receives a snapshot after every pool state change
pub trait PoolObserver: Send + Sync {
    /// Called with the new counts; must not block
    fn pool_changed(&self, snapshot: &PoolSnapshot);
}

struct Pooled<C> {
    conn: C,
    last_touched: Instant,
}

struct PoolState<C> {
    /// Idle stack; the most recently returned session is at the end
    idle: Vec<Pooled<C>>,
    live: usize,
    active: usize,
    usage: BTreeMap<UsageContext, usize>,
}

struct PoolInner<F: ConnectionFactory> {
    name: String,
    factory: F,
    max: usize,
    idle_timeout: Duration,
    local: Arc<Semaphore>,
    gate: PrioritySemaphore,
    owns_gate: bool,
    state: Mutex<PoolState<F::Connection>>,
    shutdown: CancellationToken,
    observer: Mutex<Option<Arc<dyn PoolObserver>>>,
}

impl<F: ConnectionFactory> PoolInner<F> {
    fn lock(&self) -> MutexGuard<'_, PoolState<F::Connection>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot_locked(&self, state: &PoolState<F::Connection>) -> PoolSnapshot {
        PoolSnapshot {
            live: state.live,
            idle: state.idle.len(),
            active: state.active,
            max: self.max,
            usage: state.usage.clone(),
        }
    }

    fn notify(&self, snapshot: PoolSnapshot) {
        let observer = self
            .observer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(observer) = observer {
            observer.pool_changed(&snapshot);
        }
    }

    fn is_expired(&self, pooled: &Pooled<F::Connection>, now: Instant) -> bool {
        now.saturating_duration_since(pooled.last_touched) >= self.idle_timeout
    }

    /// Pop the newest usable idle session, destroying stale ones on the way
    fn pop_idle(&self, usage: UsageContext) -> Option<F::Connection> {
        let now = Instant::now();
        let mut stale = Vec::new();
        let (conn, snapshot) = {
            let mut state = self.lock();
            let mut found = None;
            while let Some(pooled) = state.idle.pop() {
                if self.is_expired(&pooled, now) || pooled.conn.is_broken() {
                    state.live -= 1;
                    stale.push(pooled.conn);
                    continue;
                }
                found = Some(pooled.conn);
                break;
            }
            if found.is_some() {
                state.active += 1;
                *state.usage.entry(usage).or_default() += 1;
            }
            (found, self.snapshot_locked(&state))
        };

        if !stale.is_empty() {
            debug!("[{}] destroyed {} expired idle connection(s)", self.name, stale.len());
        }
        let changed = conn.is_some() || !stale.is_empty();
        drop(stale);
        if changed {
            self.notify(snapshot);
        }
        conn
    }

    /// Account for a freshly created session handed to a borrower
    fn register_new(&self, usage: UsageContext) {
        let snapshot = {
            let mut state = self.lock();
            state.live += 1;
            state.active += 1;
            *state.usage.entry(usage).or_default() += 1;
            self.snapshot_locked(&state)
        };
        self.notify(snapshot);
    }

    /// Take a session back from a borrower
    fn give_back(&self, conn: F::Connection, usage: UsageContext, destroy: bool) {
        let destroy = destroy || conn.is_broken() || self.shutdown.is_cancelled();
        let (victim, snapshot) = {
            let mut state = self.lock();
            state.active -= 1;
            if let Some(count) = state.usage.get_mut(&usage) {
                *count -= 1;
                if *count == 0 {
                    state.usage.remove(&usage);
                }
            }
            let victim = if destroy {
                state.live -= 1;
                Some(conn)
            } else {
                state.idle.push(Pooled {
                    conn,
                    last_touched: Instant::now(),
                });
                None
            };
            (victim, self.snapshot_locked(&state))
        };

        if victim.is_some() {
            trace!("[{}] connection destroyed on return", self.name);
        }
        drop(victim);
        self.notify(snapshot);
    }

    /// Destroy idle sessions past the idle timeout, keeping survivors in order
    fn sweep(&self) {
        let now = Instant::now();
        let (expired, snapshot) = {
            let mut state = self.lock();
            let idle = std::mem::take(&mut state.idle);
            let (expired, fresh): (Vec<_>, Vec<_>) =
                idle.into_iter().partition(|p| self.is_expired(p, now));
            state.idle = fresh;
            state.live -= expired.len();
            (expired, self.snapshot_locked(&state))
        };

        if !expired.is_empty() {
            debug!("[{}] idle sweep closed {} connection(s)", self.name, expired.len());
            drop(expired);
            self.notify(snapshot);
        }
    }
}

/// Bounded pool of sessions for one provider
pub struct ConnectionPool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

impl<F: ConnectionFactory> std::fmt::Debug for ConnectionPool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.inner.name)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    /// Create a pool; no session is opened until the first acquire
    ///
    /// When called inside a tokio runtime, the idle sweep task is started.
    pub fn new(factory: F, config: PoolConfig, gate: PrioritySemaphore) -> Self {
        Self::build(factory, config, gate, false)
    }

    /// Create a pool with a private gate sized to its own capacity
    ///
    /// The gate is closed by [`shutdown`](Self::shutdown).
    pub fn with_own_gate(factory: F, config: PoolConfig, high_priority_odds: u8) -> Self {
        let gate = PrioritySemaphore::new(config.max_connections, high_priority_odds);
        Self::build(factory, config, gate, true)
    }

    fn build(factory: F, config: PoolConfig, gate: PrioritySemaphore, owns_gate: bool) -> Self {
        let inner = Arc::new(PoolInner {
            name: config.name,
            factory,
            max: config.max_connections,
            idle_timeout: config.idle_timeout,
            local: Arc::new(Semaphore::new(config.max_connections)),
            gate,
            owns_gate,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                live: 0,
                active: 0,
                usage: BTreeMap::new(),
            }),
            shutdown: CancellationToken::new(),
            observer: Mutex::new(None),
        });

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(sweep_loop(
                Arc::downgrade(&inner),
                inner.shutdown.clone(),
                inner.idle_timeout,
            ));
        } else {
            warn!("[{}] created outside a runtime; idle sweep disabled", inner.name);
        }

        Self { inner }
    }

    /// Attach the observer notified on every state change
    pub fn set_observer(&self, observer: Arc<dyn PoolObserver>) {
        *self
            .inner
            .observer
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(observer);
    }

    /// Stop reporting changes
    pub fn clear_observer(&self) {
        *self
            .inner
            .observer
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Pool name used in logs
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Borrow a session
    ///
    /// Takes a local permit, then a permit from the shared gate (honouring
    /// `ctx.reserved_connections()`), then reuses the newest idle session or
    /// opens a new one. Every failure releases what was already taken.
    ///
    /// # Errors
    ///
    /// - [`NntpError::Cancelled`] - `ctx` was cancelled while waiting
    /// - [`NntpError::PoolShutdown`] - the pool or gate was shut down
    /// - any factory error (connect, TLS, auth)
    pub async fn acquire(&self, priority: Priority, ctx: &RequestContext) -> Result<ConnectionLock<F>> {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Err(NntpError::PoolShutdown);
        }
        let cancel = ctx.cancellation();

        let local = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(NntpError::Cancelled),
            _ = inner.shutdown.cancelled() => return Err(NntpError::PoolShutdown),
            permit = inner.local.clone().acquire_owned() => {
                permit.map_err(|_| NntpError::PoolShutdown)?
            }
        };

        // Dropping `local` on any early return rolls the local acquisition back
        let shared = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => return Err(NntpError::PoolShutdown),
            permit = inner.gate.acquire(priority, ctx.reserved_connections(), cancel) => permit?,
        };

        let usage = ctx.usage();
        let conn = match inner.pop_idle(usage) {
            Some(conn) => {
                trace!("[{}] reusing idle connection", inner.name);
                conn
            }
            None => {
                let created = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(NntpError::Cancelled),
                    result = inner.factory.connect() => result,
                };
                match created {
                    Ok(conn) => {
                        debug!("[{}] opened new connection", inner.name);
                        inner.register_new(usage);
                        conn
                    }
                    Err(e) => {
                        if !e.is_cancelled() {
                            warn!("[{}] failed to open connection: {}", inner.name, e);
                        }
                        return Err(e);
                    }
                }
            }
        };

        Ok(ConnectionLock {
            conn: Some(conn),
            pool: inner.clone(),
            usage,
            replace: false,
            local: Some(local),
            shared: Some(shared),
        })
    }

    /// Current counts
    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.inner.lock();
        self.inner.snapshot_locked(&state)
    }

    /// Sessions that exist
    pub fn live_connections(&self) -> usize {
        self.inner.lock().live
    }

    /// Sessions in the idle stack
    pub fn idle_connections(&self) -> usize {
        self.inner.lock().idle.len()
    }

    /// Sessions currently borrowed
    pub fn active_connections(&self) -> usize {
        self.inner.lock().active
    }

    /// Local permits not currently held
    pub fn available_connections(&self) -> usize {
        self.inner.local.available_permits()
    }

    /// Capacity
    pub fn max_connections(&self) -> usize {
        self.inner.max
    }

    /// Borrowed sessions per usage tag
    pub fn usage_breakdown(&self) -> BTreeMap<UsageContext, usize> {
        self.inner.lock().usage.clone()
    }

    /// Run the idle sweep now
    pub fn sweep_idle(&self) {
        self.inner.sweep();
    }

    /// Whether [`shutdown`](Self::shutdown) was called
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Stop the sweep, fail waiters, and close every idle session
    ///
    /// Sessions still borrowed are destroyed when their lock is dropped.
    /// A shared gate is left open since other pools may still use it; a
    /// private one is closed.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();
        inner.local.close();
        if inner.owns_gate {
            inner.gate.close();
        }

        let (idle, snapshot) = {
            let mut state = inner.lock();
            let idle = std::mem::take(&mut state.idle);
            state.live -= idle.len();
            (idle, inner.snapshot_locked(&state))
        };

        debug!("[{}] shutting down, closing {} idle connection(s)", inner.name, idle.len());
        for mut pooled in idle {
            pooled.conn.close().await;
        }
        inner.notify(snapshot);
    }
}

async fn sweep_loop<F: ConnectionFactory>(
    pool: Weak<PoolInner<F>>,
    shutdown: CancellationToken,
    idle_timeout: Duration,
) {
    let period = (idle_timeout / 2).max(Duration::from_millis(10));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(period) => {}
        }
        let Some(inner) = pool.upgrade() else {
            return;
        };
        inner.sweep();
    }
}

/// Exclusive borrow of one pooled session
///
/// Dropping the lock returns the session to the idle stack. Call
/// [`replace`](Self::replace) first when the session can no longer be
/// trusted; it is then destroyed instead. The local permit is released
/// before the shared gate permit.
pub struct ConnectionLock<F: ConnectionFactory> {
    conn: Option<F::Connection>,
    pool: Arc<PoolInner<F>>,
    usage: UsageContext,
    replace: bool,
    local: Option<OwnedSemaphorePermit>,
    shared: Option<GatePermit>,
}

impl<F: ConnectionFactory> std::fmt::Debug for ConnectionLock<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionLock")
            .field("pool", &self.pool.name)
            .field("replace", &self.replace)
            .finish_non_exhaustive()
    }
}

impl<F: ConnectionFactory> ConnectionLock<F> {
    /// Destroy the session on drop instead of pooling it
    pub fn replace(&mut self) {
        self.replace = true;
    }

    /// Pool the session on drop after all, undoing [`replace`](Self::replace)
    pub fn keep(&mut self) {
        self.replace = false;
    }

    /// Whether the session is marked for destruction
    pub fn is_marked_for_replacement(&self) -> bool {
        self.replace
    }

    /// Usage tag this borrow was taken with
    pub fn usage(&self) -> UsageContext {
        self.usage
    }

    /// Return the session to the pool now
    pub fn release(self) {}

    /// Destroy the session now
    pub fn destroy(mut self) {
        self.replace = true;
    }
}

impl<F: ConnectionFactory> Deref for ConnectionLock<F> {
    type Target = F::Connection;

    #[expect(clippy::expect_used)]
    fn deref(&self) -> &F::Connection {
        self.conn
            .as_ref()
            .expect("BUG: connection lock used after release")
    }
}

impl<F: ConnectionFactory> DerefMut for ConnectionLock<F> {
    #[expect(clippy::expect_used)]
    fn deref_mut(&mut self) -> &mut F::Connection {
        self.conn
            .as_mut()
            .expect("BUG: connection lock used after release")
    }
}

impl<F: ConnectionFactory> Drop for ConnectionLock<F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(conn, self.usage, self.replace);
        }
        drop(self.local.take());
        drop(self.shared.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{ArticleHeaders, ArticleStat};
    use crate::yenc::YencHeader;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct TestConn {
        id: usize,
        broken: bool,
    }

    #[async_trait]
    impl ArticleConnection for TestConn {
        async fn stat(&mut self, _segment_id: &str) -> Result<ArticleStat> {
            Ok(ArticleStat::Missing)
        }
        async fn head(&mut self, _segment_id: &str) -> Result<ArticleHeaders> {
            Ok(ArticleHeaders::default())
        }
        async fn body(&mut self, _segment_id: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn article(&mut self, _segment_id: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn yenc_header(&mut self, _segment_id: &str) -> Result<YencHeader> {
            Err(NntpError::Other("unused".into()))
        }
        async fn date(&mut self) -> Result<DateTime<Utc>> {
            Ok(Utc::now())
        }
        fn is_broken(&self) -> bool {
            self.broken
        }
    }

    #[derive(Default)]
    struct TestFactory {
        created: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl ConnectionFactory for Arc<TestFactory> {
        type Connection = TestConn;

        async fn connect(&self) -> Result<TestConn> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(NntpError::Connect("refused".into()));
            }
            let id = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(TestConn { id, broken: false })
        }
    }

    fn pool(max: usize, idle: Duration) -> (ConnectionPool<Arc<TestFactory>>, Arc<TestFactory>) {
        let factory = Arc::new(TestFactory::default());
        let pool = ConnectionPool::new(
            factory.clone(),
            PoolConfig::new("test", max).with_idle_timeout(idle),
            PrioritySemaphore::new(max, 80),
        );
        (pool, factory)
    }

    fn assert_invariant(pool: &ConnectionPool<Arc<TestFactory>>) {
        let s = pool.snapshot();
        assert_eq!(s.active + s.idle, s.live, "{:?}", s);
        assert!(s.live <= s.max, "{:?}", s);
    }

    #[tokio::test]
    async fn test_reuses_newest_idle_connection() {
        let (pool, factory) = pool(3, Duration::from_secs(60));
        let ctx = RequestContext::new();

        let a = pool.acquire(Priority::High, &ctx).await.unwrap();
        let b = pool.acquire(Priority::High, &ctx).await.unwrap();
        let (a_id, b_id) = (a.id, b.id);
        drop(a);
        drop(b);
        assert_eq!(pool.idle_connections(), 2);
        assert_invariant(&pool);

        // LIFO: b went back last
        let c = pool.acquire(Priority::High, &ctx).await.unwrap();
        assert_eq!(c.id, b_id);
        assert_ne!(c.id, a_id);
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_invariant(&pool);
    }

    #[tokio::test]
    async fn test_replace_destroys_connection() {
        let (pool, _) = pool(2, Duration::from_secs(60));
        let ctx = RequestContext::new();

        let mut lock = pool.acquire(Priority::High, &ctx).await.unwrap();
        lock.replace();
        drop(lock);

        assert_eq!(pool.live_connections(), 0);
        assert_eq!(pool.idle_connections(), 0);
        assert_eq!(pool.available_connections(), 2);
    }

    #[tokio::test]
    async fn test_keep_undoes_replace() {
        let (pool, _) = pool(2, Duration::from_secs(60));
        let ctx = RequestContext::new();

        let mut lock = pool.acquire(Priority::High, &ctx).await.unwrap();
        lock.replace();
        lock.keep();
        assert!(!lock.is_marked_for_replacement());
        drop(lock);
        assert_eq!(pool.idle_connections(), 1);
        assert_invariant(&pool);
    }

    #[tokio::test]
    async fn test_broken_connection_not_pooled() {
        let (pool, _) = pool(2, Duration::from_secs(60));
        let ctx = RequestContext::new();

        let mut lock = pool.acquire(Priority::High, &ctx).await.unwrap();
        lock.broken = true;
        drop(lock);
        assert_eq!(pool.live_connections(), 0);
    }

    #[tokio::test]
    async fn test_factory_failure_releases_capacity() {
        let (pool, factory) = pool(1, Duration::from_secs(60));
        factory.fail.store(true, Ordering::SeqCst);
        let ctx = RequestContext::new();

        let err = pool.acquire(Priority::High, &ctx).await.err().unwrap();
        assert!(matches!(err, NntpError::Connect(_)));
        assert_eq!(pool.available_connections(), 1);
        assert_eq!(pool.live_connections(), 0);

        factory.fail.store(false, Ordering::SeqCst);
        assert!(pool.acquire(Priority::High, &ctx).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_idle_connection_is_replaced() {
        let (pool, factory) = pool(2, Duration::from_secs(10));
        let ctx = RequestContext::new();

        let first = pool.acquire(Priority::High, &ctx).await.unwrap();
        let first_id = first.id;
        drop(first);

        tokio::time::advance(Duration::from_secs(11)).await;

        let second = pool.acquire(Priority::High, &ctx).await.unwrap();
        assert_ne!(second.id, first_id);
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);
        assert_eq!(pool.live_connections(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_closes_idle_connections() {
        let (pool, _) = pool(2, Duration::from_secs(10));
        let ctx = RequestContext::new();

        let a = pool.acquire(Priority::High, &ctx).await.unwrap();
        drop(a);
        assert_eq!(pool.idle_connections(), 1);

        // Sweep runs every 5s; after 16s the connection is past its timeout
        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(pool.idle_connections(), 0);
        assert_eq!(pool.live_connections(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_acquire_leaves_no_trace() {
        let (pool, _) = pool(1, Duration::from_secs(60));
        let ctx = RequestContext::new();
        let held = pool.acquire(Priority::High, &ctx).await.unwrap();
        let before = pool.available_connections();

        let waiter_ctx = RequestContext::new();
        let cancel = waiter_ctx.cancellation().clone();
        let (result, _) = tokio::join!(pool.acquire(Priority::Low, &waiter_ctx), async {
            tokio::task::yield_now().await;
            cancel.cancel();
        });
        assert!(matches!(result, Err(NntpError::Cancelled)));
        assert_eq!(pool.available_connections(), before);

        drop(held);
        assert_eq!(pool.available_connections(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_idle_and_destroys_returns() {
        let (pool, _) = pool(3, Duration::from_secs(60));
        let ctx = RequestContext::new();

        let a = pool.acquire(Priority::High, &ctx).await.unwrap();
        let b = pool.acquire(Priority::High, &ctx).await.unwrap();
        let active = pool.acquire(Priority::High, &ctx).await.unwrap();
        drop(a);
        drop(b);
        assert_eq!(pool.live_connections(), 3);

        pool.shutdown().await;
        assert_eq!(pool.live_connections(), 1);

        drop(active);
        assert_eq!(pool.live_connections(), 0);
        assert!(matches!(
            pool.acquire(Priority::High, &ctx).await,
            Err(NntpError::PoolShutdown)
        ));
    }

    #[tokio::test]
    async fn test_usage_breakdown() {
        let (pool, _) = pool(3, Duration::from_secs(60));
        let streaming = RequestContext::new();
        let queue = RequestContext::new().with_usage(UsageContext::Queue);

        let a = pool.acquire(Priority::High, &streaming).await.unwrap();
        let b = pool.acquire(Priority::Low, &queue).await.unwrap();
        let c = pool.acquire(Priority::Low, &queue).await.unwrap();

        let usage = pool.usage_breakdown();
        assert_eq!(usage.get(&UsageContext::Streaming), Some(&1));
        assert_eq!(usage.get(&UsageContext::Queue), Some(&2));

        drop((a, b, c));
        assert!(pool.usage_breakdown().is_empty());
    }

    #[tokio::test]
    async fn test_observer_sees_every_change() {
        struct Recorder(Mutex<Vec<PoolSnapshot>>);
        impl PoolObserver for Recorder {
            fn pool_changed(&self, snapshot: &PoolSnapshot) {
                self.0.lock().unwrap().push(snapshot.clone());
            }
        }

        let (pool, _) = pool(2, Duration::from_secs(60));
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        pool.set_observer(recorder.clone());

        let ctx = RequestContext::new();
        let lock = pool.acquire(Priority::High, &ctx).await.unwrap();
        drop(lock);

        {
            let seen = recorder.0.lock().unwrap();
            assert_eq!(seen.len(), 2);
            assert_eq!((seen[0].live, seen[0].active, seen[0].idle), (1, 1, 0));
            assert_eq!((seen[1].live, seen[1].active, seen[1].idle), (1, 0, 1));
            for s in seen.iter() {
                assert_eq!(s.active + s.idle, s.live);
            }
        }

        pool.clear_observer();
        drop(pool.acquire(Priority::High, &ctx).await.unwrap());
        assert_eq!(recorder.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_private_gate_closed_on_shutdown() {
        let pool = ConnectionPool::with_own_gate(
            Arc::new(TestFactory::default()),
            PoolConfig::new("own", 2),
            80,
        );
        let ctx = RequestContext::new();
        drop(pool.acquire(Priority::High, &ctx).await.unwrap());

        let gate = pool.inner.gate.clone();
        assert!(!gate.is_closed());
        pool.shutdown().await;
        assert!(gate.is_closed());
        assert_eq!(pool.live_connections(), 0);
    }

    #[tokio::test]
    async fn test_shared_gate_caps_across_pools() {
        let gate = PrioritySemaphore::new(1, 80);
        let a = ConnectionPool::new(
            Arc::new(TestFactory::default()),
            PoolConfig::new("a", 2),
            gate.clone(),
        );
        let b = ConnectionPool::new(
            Arc::new(TestFactory::default()),
            PoolConfig::new("b", 2),
            gate.clone(),
        );
        let ctx = RequestContext::new();

        let held = a.acquire(Priority::High, &ctx).await.unwrap();
        let blocked = tokio::time::timeout(
            Duration::from_millis(20),
            b.acquire(Priority::High, &ctx),
        )
        .await;
        assert!(blocked.is_err());
        // The timed-out acquire gave its local permit back
        assert_eq!(b.available_connections(), 2);

        drop(held);
        assert!(b.acquire(Priority::High, &ctx).await.is_ok());
    }
}
