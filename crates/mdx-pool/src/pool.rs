//! Session pool implementation.
//!
//! The pool keeps one sub-queue of idle sessions per connection target.
//! Two lock tiers protect it:
//!
//! - the registry map (target -> sub-queue) sits behind a read/write lock
//!   that is only held to look up or insert a sub-queue;
//! - each sub-queue has its own mutex, held only to take or put back one
//!   idle session.
//!
//! The registry lock is always released before a sub-queue lock is taken,
//! and no lock is held while a connection is being opened.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::extra::ExtraData;
use crate::lifecycle::{
    ConnectionFactory, ConnectionTarget, OlapConnection, SessionId, SessionInfo,
};
use crate::session::PooledSession;

/// Process-wide pools created by [`SessionPool::global`], one per factory type.
///
/// Entries are leaked on purpose: they live until the process exits.
static GLOBAL_POOLS: Lazy<Mutex<HashMap<TypeId, &'static (dyn Any + Send + Sync)>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// A pool of reusable OLAP sessions keyed by connection target.
///
/// Acquiring a session either resumes an idle session of the same target
/// on a new transport connection, or establishes a brand-new one. The
/// returned [`PooledSession`] hands the session back when it is dropped.
///
/// Cloning the pool is cheap; clones share the same sessions.
pub struct SessionPool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

struct PoolInner<F> {
    factory: F,
    shared: Arc<PoolShared>,
    queues: RwLock<HashMap<ConnectionTarget, Arc<SubQueue>>>,
}

/// State the return path needs without knowing the factory type.
pub(crate) struct PoolShared {
    config: PoolConfig,
    counters: Counters,
}

impl PoolShared {
    pub(crate) fn new(config: PoolConfig) -> Self {
        Self {
            config,
            counters: Counters::default(),
        }
    }
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    resumed: AtomicU64,
    reclaimed: AtomicU64,
    discarded: AtomicU64,
    checked_out: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Idle sessions of one connection target.
pub(crate) struct SubQueue {
    target: ConnectionTarget,
    idle: Mutex<HashMap<SessionId, ExtraData>>,
}

impl SubQueue {
    pub(crate) fn new(target: ConnectionTarget) -> Self {
        Self {
            target,
            idle: Mutex::new(HashMap::new()),
        }
    }

    /// Take any one idle session out of the queue.
    fn checkout(&self) -> Option<(SessionId, ExtraData)> {
        let mut idle = self.idle.lock();
        let session = idle.keys().next().cloned()?;
        idle.remove_entry(&session)
    }

    pub(crate) fn len(&self) -> usize {
        self.idle.lock().len()
    }

    pub(crate) fn contains(&self, session: &SessionId) -> bool {
        self.idle.lock().contains_key(session)
    }

    #[cfg(test)]
    pub(crate) fn with_idle<R>(
        &self,
        session: &SessionId,
        f: impl FnOnce(&ExtraData) -> R,
    ) -> Option<R> {
        self.idle.lock().get(session).map(f)
    }
}

/// The way back into the pool for one checked-out session.
///
/// Consumed by [`ReturnPath::reclaim`], so a session is returned at most once.
pub(crate) struct ReturnPath {
    queue: Arc<SubQueue>,
    shared: Arc<PoolShared>,
}

impl ReturnPath {
    pub(crate) fn new(queue: Arc<SubQueue>, shared: Arc<PoolShared>) -> Self {
        Self { queue, shared }
    }

    /// Close the transport and put the session back if it is still healthy.
    ///
    /// Never fails: any irregularity discards the session instead.
    pub(crate) fn reclaim<C: OlapConnection>(
        self,
        connection: &mut C,
        extra: ExtraData,
        broken: bool,
    ) {
        let counters = &self.shared.counters;
        let target = &self.queue.target;
        counters.checked_out.fetch_sub(1, Ordering::Relaxed);

        let end_session = broken && self.shared.config.end_session_on_discard;
        if let Err(error) = connection.close(end_session) {
            Counters::bump(&counters.discarded);
            tracing::warn!(
                connection = %target,
                session = ?connection.session_id(),
                error = %error,
                "failed to close pooled connection, discarding session"
            );
            return;
        }

        let state = connection.state();
        let mut idle = self.queue.idle.lock();
        let session = match connection.session_id() {
            Some(session)
                if !broken && state.is_closed() && self.shared.config.has_idle_room(idle.len()) =>
            {
                session.clone()
            }
            _ => {
                let idle_count = idle.len();
                drop(idle);
                Counters::bump(&counters.discarded);
                tracing::debug!(
                    connection = %target,
                    session = ?connection.session_id(),
                    broken,
                    state = ?state,
                    idle = idle_count,
                    "discarding session"
                );
                return;
            }
        };
        idle.insert(session.clone(), extra);
        drop(idle);

        Counters::bump(&counters.reclaimed);
        tracing::trace!(connection = %target, session = %session, "returned session to pool");
    }
}

impl<F: ConnectionFactory> SessionPool<F> {
    /// Create a pool with the default configuration.
    pub fn new(factory: F) -> Self {
        Self::from_parts(factory, PoolConfig::default())
    }

    /// Create a pool with a custom configuration.
    pub fn with_config(factory: F, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        Ok(Self::from_parts(factory, config))
    }

    /// Start building a pool around `factory`.
    pub fn builder(factory: F) -> PoolBuilder<F> {
        PoolBuilder {
            factory,
            config: PoolConfig::default(),
        }
    }

    fn from_parts(factory: F, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                factory,
                shared: Arc::new(PoolShared::new(config)),
                queues: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Get a session for `target`.
    ///
    /// Resumes an idle session of the same target when one is available,
    /// otherwise establishes a new one. Connection establishment happens
    /// outside of every pool lock.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Establish`] when a new session cannot be opened,
    /// and [`PoolError::Resume`] when an idle session cannot be resumed and
    /// falling back is disabled.
    pub async fn acquire(
        &self,
        target: impl Into<ConnectionTarget>,
    ) -> Result<PooledSession<F::Connection>, PoolError> {
        let target = target.into();
        let queue = self.sub_queue(&target);

        tracing::trace!(connection = %target, "acquiring session from pool");

        while let Some((session, extra)) = queue.checkout() {
            match self.resume(&target, session, extra, &queue).await {
                Ok(pooled) => return Ok(pooled),
                Err(error) if self.inner.shared.config.fallback_on_resume_failure => {
                    tracing::warn!(
                        connection = %target,
                        error = %error,
                        "could not resume idle session, trying the next one"
                    );
                }
                Err(error) => return Err(error),
            }
        }

        self.establish(&target, &queue).await
    }

    /// Find the sub-queue for `target`, creating it on first use.
    fn sub_queue(&self, target: &ConnectionTarget) -> Arc<SubQueue> {
        if let Some(queue) = self.inner.queues.read().get(target) {
            return Arc::clone(queue);
        }

        let mut queues = self.inner.queues.write();
        let queue = queues.entry(target.clone()).or_insert_with(|| {
            tracing::debug!(connection = %target, "creating session queue for new target");
            Arc::new(SubQueue::new(target.clone()))
        });
        Arc::clone(queue)
    }

    async fn resume(
        &self,
        target: &ConnectionTarget,
        session: SessionId,
        extra: ExtraData,
        queue: &Arc<SubQueue>,
    ) -> Result<PooledSession<F::Connection>, PoolError> {
        let mut connection = self.inner.factory.create(target);
        connection.set_session_id(session.clone());

        if let Err(source) = connection.open().await {
            Counters::bump(&self.inner.shared.counters.discarded);
            return Err(PoolError::Resume {
                target: target.clone(),
                session,
                source: Box::new(source),
            });
        }

        Counters::bump(&self.inner.shared.counters.resumed);
        tracing::debug!(connection = %target, session = %session, "resumed pooled session");

        Ok(self.hand_out(target, connection, extra, queue, true))
    }

    async fn establish(
        &self,
        target: &ConnectionTarget,
        queue: &Arc<SubQueue>,
    ) -> Result<PooledSession<F::Connection>, PoolError> {
        let mut connection = self.inner.factory.create(target);

        connection
            .open()
            .await
            .map_err(|source| PoolError::Establish {
                target: target.clone(),
                source: Box::new(source),
            })?;

        Counters::bump(&self.inner.shared.counters.created);
        tracing::debug!(
            connection = %target,
            session = ?connection.session_id(),
            "established new session"
        );

        Ok(self.hand_out(target, connection, ExtraData::new(), queue, false))
    }

    fn hand_out(
        &self,
        target: &ConnectionTarget,
        connection: F::Connection,
        extra: ExtraData,
        queue: &Arc<SubQueue>,
        resumed: bool,
    ) -> PooledSession<F::Connection> {
        Counters::bump(&self.inner.shared.counters.checked_out);
        let info = SessionInfo::new(target.clone(), connection.session_id().cloned(), resumed);
        let returns = ReturnPath::new(Arc::clone(queue), Arc::clone(&self.inner.shared));
        PooledSession::new(connection, extra, info, returns)
    }

    /// Forget every idle session of `target`.
    ///
    /// The sessions are left to expire on the server. Returns how many
    /// sessions were dropped.
    pub fn purge(&self, target: &str) -> usize {
        let Some(queue) = self.lookup(target) else {
            return 0;
        };

        let drained = mem::take(&mut *queue.idle.lock());
        let count = drained.len();
        self.inner
            .shared
            .counters
            .discarded
            .fetch_add(count as u64, Ordering::Relaxed);

        tracing::info!(connection = %queue.target, sessions = count, "purged idle sessions");
        count
    }

    /// Number of idle sessions waiting for `target`.
    #[must_use]
    pub fn idle_count(&self, target: &str) -> usize {
        self.lookup(target).map_or(0, |queue| queue.len())
    }

    /// Check if `session` is currently idle in the queue for `target`.
    #[must_use]
    pub fn is_idle(&self, target: &str, session: &SessionId) -> bool {
        self.lookup(target)
            .is_some_and(|queue| queue.contains(session))
    }

    /// Every target the pool has seen.
    #[must_use]
    pub fn targets(&self) -> Vec<ConnectionTarget> {
        self.inner.queues.read().keys().cloned().collect()
    }

    fn lookup(&self, target: &str) -> Option<Arc<SubQueue>> {
        self.inner.queues.read().get(target).cloned()
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let queues: Vec<Arc<SubQueue>> = self.inner.queues.read().values().cloned().collect();
        let idle = queues.iter().map(|queue| queue.len()).sum();
        let counters = &self.inner.shared.counters;

        PoolStatus {
            targets: queues.len(),
            idle,
            checked_out: counters.checked_out.load(Ordering::Relaxed),
            created: counters.created.load(Ordering::Relaxed),
            resumed: counters.resumed.load(Ordering::Relaxed),
            reclaimed: counters.reclaimed.load(Ordering::Relaxed),
            discarded: counters.discarded.load(Ordering::Relaxed),
        }
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.shared.config
    }

    /// Get the connection factory.
    #[must_use]
    pub fn factory(&self) -> &F {
        &self.inner.factory
    }
}

impl<F: ConnectionFactory + Default> SessionPool<F> {
    /// The process-wide pool for this factory type.
    ///
    /// Created with `F::default()` and the default configuration on first
    /// use, and never torn down.
    pub fn global() -> &'static Self {
        let mut pools = GLOBAL_POOLS.lock();
        let pool: &'static (dyn Any + Send + Sync) =
            *pools.entry(TypeId::of::<F>()).or_insert_with(|| {
                tracing::debug!(
                    factory = std::any::type_name::<F>(),
                    "initializing global session pool"
                );
                let leaked: &'static Self = Box::leak(Box::new(Self::new(F::default())));
                leaked as &'static (dyn Any + Send + Sync)
            });
        match pool.downcast_ref::<Self>() {
            Some(pool) => pool,
            // Entries are keyed by the TypeId of their own factory.
            None => unreachable!("global session pool registered under a foreign TypeId"),
        }
    }
}

impl<F: ConnectionFactory> Clone for SessionPool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> std::fmt::Debug for SessionPool<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("config", &self.inner.shared.config)
            .field("status", &self.status())
            .finish()
    }
}

/// Builder for [`SessionPool`].
#[derive(Debug)]
pub struct PoolBuilder<F> {
    factory: F,
    config: PoolConfig,
}

impl<F: ConnectionFactory> PoolBuilder<F> {
    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Cap the number of idle sessions kept for each target.
    #[must_use]
    pub fn max_idle_per_target(mut self, count: usize) -> Self {
        self.config = self.config.max_idle_per_target(count);
        self
    }

    /// Enable or disable falling back when an idle session cannot be resumed.
    #[must_use]
    pub fn fallback_on_resume_failure(mut self, enabled: bool) -> Self {
        self.config = self.config.fallback_on_resume_failure(enabled);
        self
    }

    /// Enable or disable ending the remote session of broken handles.
    #[must_use]
    pub fn end_session_on_discard(mut self, enabled: bool) -> Self {
        self.config = self.config.end_session_on_discard(enabled);
        self
    }

    /// Validate the configuration and build the pool.
    pub fn build(self) -> Result<SessionPool<F>, PoolError> {
        SessionPool::with_config(self.factory, self.config)
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatus {
    /// Number of distinct targets seen.
    pub targets: usize,
    /// Idle sessions across all targets.
    pub idle: usize,
    /// Sessions currently held by callers.
    pub checked_out: u64,
    /// Sessions established from scratch.
    pub created: u64,
    /// Idle sessions resumed on a new transport.
    pub resumed: u64,
    /// Sessions put back into a queue on release.
    pub reclaimed: u64,
    /// Sessions dropped instead of being reused.
    pub discarded: u64,
}
