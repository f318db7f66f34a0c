//! Bounded idle-connection pool with kernel-driven liveness detection.
//!
//! One mutex guards the idle list, the lifecycle flag, the factory and the
//! monitor handle. Every mutation of that state (checkout, release,
//! eviction, teardown) happens inside one critical section. The factory is
//! never called, and no connection is closed, while the lock is held.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};

use crate::config::{PoolConfig, ReusePolicy};
use crate::conn::PooledConn;
use crate::error::{PoolError, PoolResult};
use crate::idle::IdleList;
use crate::metrics::{MetricsSnapshot, PoolMetrics};
use crate::monitor::Monitor;

/// Produces new raw connections for the pool.
///
/// Implemented for every `Fn() -> io::Result<C>` closure, so
/// `move || TcpStream::connect(addr)` is a factory.
pub trait Factory<C>: Send + Sync {
    fn create(&self) -> io::Result<C>;
}

impl<C, F> Factory<C> for F
where
    F: Fn() -> io::Result<C> + Send + Sync,
{
    fn create(&self) -> io::Result<C> {
        self()
    }
}

/// An idle connection and the generation it was registered under.
struct Parked<C> {
    conn: C,
    generation: u32,
}

struct State<C> {
    idle: IdleList<Parked<C>>,
    factory: Option<Arc<dyn Factory<C>>>,
    monitor: Option<Arc<Monitor>>,
    worker: Option<JoinHandle<()>>,
    next_generation: u32,
    closed: bool,
}

impl<C> State<C> {
    /// The monitor, unless the pool is closed or its wait loop has failed.
    fn watcher(&self) -> Option<&Monitor> {
        self.monitor.as_deref().filter(|m| !m.has_failed())
    }
}

pub(crate) struct Shared<C: AsRawFd + Send + 'static> {
    state: Mutex<State<C>>,
    max_cap: usize,
    reuse: ReusePolicy,
    metrics: PoolMetrics,
}

/// Handle to a connection pool. Clones share the same pool; the pool is torn
/// down when [`Pool::teardown`] is called or the last handle is dropped.
pub struct Pool<C: AsRawFd + Send + 'static> {
    shared: Arc<Shared<C>>,
}

impl<C: AsRawFd + Send + 'static> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: AsRawFd + Send + 'static> Pool<C> {
    /// Create a pool holding at most `max_cap` idle connections, pre-warmed
    /// with `initial_cap` of them.
    pub fn new<F>(initial_cap: usize, max_cap: usize, factory: F) -> PoolResult<Self>
    where
        F: Factory<C> + 'static,
    {
        Self::with_config(PoolConfig::new(initial_cap, max_cap), factory)
    }

    pub fn with_config<F>(config: PoolConfig, factory: F) -> PoolResult<Self>
    where
        F: Factory<C> + 'static,
    {
        config.validate()?;

        let monitor = Arc::new(Monitor::new(config.event_batch)?);
        let factory: Arc<dyn Factory<C>> = Arc::new(factory);

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                idle: IdleList::with_capacity(config.max_cap),
                factory: Some(Arc::clone(&factory)),
                monitor: Some(Arc::clone(&monitor)),
                worker: None,
                next_generation: 0,
                closed: false,
            }),
            max_cap: config.max_cap,
            reuse: config.reuse,
            metrics: PoolMetrics::new(),
        });

        // Pre-warm through the normal release path. Any failure closes what
        // was created so far.
        for _ in 0..config.initial_cap {
            let prewarmed = shared
                .create(factory.as_ref())
                .and_then(|(fd, conn)| shared.put(fd, conn));
            if let Err(e) = prewarmed {
                shared.teardown();
                return Err(e);
            }
        }

        let weak = Arc::downgrade(&shared);
        let on_dead = move |fd, generation| evict_via(&weak, fd, generation);
        let worker = match monitor.spawn(&config.thread_name, on_dead) {
            Ok(worker) => worker,
            Err(e) => {
                shared.teardown();
                return Err(e);
            }
        };
        shared.lock().worker = Some(worker);

        tracing::info!(
            initial_cap = config.initial_cap,
            max_cap = config.max_cap,
            reuse = ?config.reuse,
            "connection pool opened"
        );
        Ok(Self { shared })
    }

    /// Take an idle connection, or create one when none is idle.
    pub fn checkout(&self) -> PoolResult<PooledConn<C>> {
        self.shared.checkout()
    }

    /// Number of idle connections. Checked-out connections are not counted.
    pub fn size(&self) -> usize {
        self.shared.lock().idle.len()
    }

    pub fn max_cap(&self) -> usize {
        self.shared.max_cap
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Whether idle connections are still being watched for peer hangup.
    /// False after teardown or after the monitor loop failed. A failed
    /// monitor is not restarted; checkout and release keep working.
    pub fn is_monitoring(&self) -> bool {
        let state = self.shared.lock();
        state.monitor.as_ref().is_some_and(|m| m.is_running())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Close every idle connection and stop the liveness monitor.
    ///
    /// Connections still checked out are closed when they are released.
    /// Calling it again is a no-op.
    pub fn teardown(&self) {
        self.shared.teardown();
    }
}

fn evict_via<C: AsRawFd + Send + 'static>(pool: &Weak<Shared<C>>, fd: RawFd, generation: u32) {
    if let Some(shared) = pool.upgrade() {
        shared.evict(fd, generation);
    }
}

impl<C: AsRawFd + Send + 'static> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, State<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn create(&self, factory: &dyn Factory<C>) -> PoolResult<(RawFd, C)> {
        let conn = factory.create().map_err(PoolError::Factory)?;
        let fd = conn.as_raw_fd();
        if fd < 0 {
            return Err(PoolError::Factory(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("factory returned a connection with invalid descriptor {fd}"),
            )));
        }
        self.metrics.inc_created();
        tracing::debug!(fd, "connection created");
        Ok((fd, conn))
    }

    pub(crate) fn destroy(&self, fd: RawFd, conn: C) {
        drop(conn);
        self.metrics.inc_destroyed();
        tracing::debug!(fd, "connection destroyed");
    }

    fn checkout(self: &Arc<Self>) -> PoolResult<PooledConn<C>> {
        let factory = {
            let mut state = self.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }

            let next = match self.reuse {
                ReusePolicy::Fifo => state.idle.pop_front(),
                ReusePolicy::Lifo => state.idle.pop_back(),
            };
            if let Some((fd, Parked { conn, .. })) = next {
                if let Some(monitor) = state.watcher() {
                    if let Err(e) = monitor.deregister(fd) {
                        tracing::warn!(fd, error = %e, "failed to stop watching checked-out connection");
                    }
                }
                drop(state);
                self.metrics.inc_checkout(true);
                tracing::debug!(fd, "idle connection checked out");
                return Ok(PooledConn::new(fd, conn, Arc::downgrade(self)));
            }

            match &state.factory {
                Some(factory) => Arc::clone(factory),
                None => return Err(PoolError::Closed),
            }
        };

        let (fd, conn) = self.create(factory.as_ref())?;

        // Teardown may have run while the factory was dialing.
        let closed = self.lock().closed;
        if closed {
            self.destroy(fd, conn);
            return Err(PoolError::Closed);
        }
        self.metrics.inc_checkout(false);
        Ok(PooledConn::new(fd, conn, Arc::downgrade(self)))
    }

    /// Park `conn` idle, or close it when the pool is closed or full.
    pub(crate) fn put(&self, fd: RawFd, conn: C) -> PoolResult<()> {
        let mut state = self.lock();

        if state.closed {
            drop(state);
            self.destroy(fd, conn);
            return Err(PoolError::Closed);
        }

        if state.idle.len() >= self.max_cap {
            drop(state);
            self.destroy(fd, conn);
            return Ok(());
        }

        let generation = state.next_generation;
        state.next_generation = generation.wrapping_add(1);

        // After a monitor failure the connection is parked unwatched.
        let registered = match (&state.monitor, state.watcher()) {
            (_, Some(monitor)) => monitor.register(fd, generation),
            (Some(_), None) => Ok(()),
            (None, None) => Err(PoolError::Closed),
        };
        if let Err(e) = registered {
            drop(state);
            tracing::warn!(fd, error = %e, "failed to watch returned connection");
            self.destroy(fd, conn);
            return Err(e);
        }

        if let Err(parked) = state.idle.push_back(fd, Parked { conn, generation }) {
            // A live descriptor number cannot be idle twice; keep the parked one.
            drop(state);
            tracing::warn!(fd, "descriptor already idle, closing duplicate");
            self.destroy(fd, parked.conn);
            return Ok(());
        }
        tracing::debug!(fd, idle = state.idle.len(), "connection returned to pool");
        Ok(())
    }

    /// Drop a dead idle connection and try to put a fresh one in its place.
    ///
    /// Ignored unless `fd` is idle under the same registration `generation`:
    /// the event may predate a checkout, or the number may have been reused
    /// by a newer connection.
    fn evict(&self, fd: RawFd, generation: u32) {
        let (dead, factory) = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            let current = state.idle.get(fd).map(|parked| parked.generation);
            if current != Some(generation) {
                tracing::debug!(fd, generation, "ignoring hangup for connection that is no longer idle");
                return;
            }
            let Some(Parked { conn: dead, .. }) = state.idle.remove(fd) else {
                return;
            };
            if let Some(monitor) = state.watcher() {
                if let Err(e) = monitor.deregister(fd) {
                    tracing::warn!(fd, error = %e, "failed to stop watching dead connection");
                }
            }
            (dead, state.factory.clone())
        };

        self.metrics.inc_eviction();
        tracing::debug!(fd, "peer closed idle connection, evicting");
        self.destroy(fd, dead);

        let Some(factory) = factory else {
            return;
        };
        let replaced = self
            .create(factory.as_ref())
            .and_then(|(new_fd, conn)| self.put(new_fd, conn));
        match replaced {
            Ok(()) => {}
            Err(PoolError::Closed) => {}
            Err(e) => {
                self.metrics.inc_replacement_failure();
                tracing::warn!(fd, error = %e, "failed to replace evicted connection");
            }
        }
    }

    pub(crate) fn teardown(&self) {
        let (idle, monitor, worker) = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.factory = None;
            (
                state.idle.drain(),
                state.monitor.take(),
                state.worker.take(),
            )
        };

        let closed = idle.len();
        for (fd, parked) in idle {
            if let Some(monitor) = monitor.as_deref().filter(|m| !m.has_failed()) {
                let _ = monitor.deregister(fd);
            }
            self.destroy(fd, parked.conn);
        }

        if let Some(monitor) = &monitor {
            monitor.shutdown();
        }
        // Teardown can run on the monitor thread itself when it held the
        // last strong reference; that thread exits on its own after the wake.
        if let Some(worker) = worker {
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                tracing::error!("liveness monitor thread panicked");
            }
        }

        tracing::info!(closed, "connection pool torn down");
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        let state = self.lock();
        state.idle.check_invariants();
        assert!(state.idle.len() <= self.max_cap);
        if state.closed {
            assert!(state.idle.is_empty());
            assert!(state.factory.is_none());
            assert!(state.monitor.is_none());
        }
    }
}

impl<C: AsRawFd + Send + 'static> Drop for Shared<C> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Chained construction of a [`Pool`].
///
/// ```rust,no_run
/// use fermata::{Pool, PoolBuilder, ReusePolicy};
/// use std::net::TcpStream;
///
/// let pool: Pool<TcpStream> = PoolBuilder::new()
///     .initial_cap(2)
///     .max_cap(16)
///     .reuse(ReusePolicy::Lifo)
///     .build(|| TcpStream::connect("127.0.0.1:6379"))?;
/// # Ok::<(), fermata::PoolError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct PoolBuilder {
    config: PoolConfig,
}

impl PoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: PoolConfig) -> Self {
        Self { config }
    }

    pub fn initial_cap(mut self, initial_cap: usize) -> Self {
        self.config.initial_cap = initial_cap;
        self
    }

    pub fn max_cap(mut self, max_cap: usize) -> Self {
        self.config.max_cap = max_cap;
        self
    }

    pub fn reuse(mut self, reuse: ReusePolicy) -> Self {
        self.config.reuse = reuse;
        self
    }

    pub fn event_batch(mut self, event_batch: usize) -> Self {
        self.config.event_batch = event_batch;
        self
    }

    pub fn thread_name(mut self, name: &str) -> Self {
        self.config.thread_name = name.to_string();
        self
    }

    pub fn build<C, F>(self, factory: F) -> PoolResult<Pool<C>>
    where
        C: AsRawFd + Send + 'static,
        F: Factory<C> + 'static,
    {
        Pool::with_config(self.config, factory)
    }
}
