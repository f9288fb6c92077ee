use crate::config::{AcquirePolicy, PoolConfig};
use crate::error::PoolError;
use async_trait::async_trait;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info, warn};

/// Caller-supplied constructor and teardown for pooled resources.
#[async_trait]
pub trait Manager: Send + Sync + 'static {
    type Resource: Send + 'static;
    type Error: std::fmt::Debug + std::fmt::Display + Send + Sync + 'static;

    async fn create(&self) -> Result<Self::Resource, Self::Error>;

    async fn destroy(&self, resource: Self::Resource);

    /// Called on idle entries before they are handed out or kept by the
    /// reaper. Entries that fail it are destroyed instead.
    fn is_reusable(&self, _resource: &Self::Resource) -> bool {
        true
    }
}

/// Snapshot of a pool's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub max_size: usize,
    pub total: usize,
    pub idle: usize,
    pub in_use: usize,
}

struct IdleEntry<R> {
    resource: R,
    released_at: Instant,
}

struct State<R> {
    idle: Vec<IdleEntry<R>>,
    total: usize,
    in_use: usize,
    closed: bool,
}

struct Shared<M: Manager> {
    manager: M,
    config: PoolConfig,
    // One permit per in-use entry; tokio's semaphore queues waiters FIFO.
    permits: Arc<Semaphore>,
    state: Mutex<State<M::Resource>>,
}

impl<M: Manager> Shared<M> {
    fn lock(&self) -> MutexGuard<'_, State<M::Resource>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded pool of reusable resources.
///
/// Every check of the pool state and the mutation it guards happen under one
/// lock acquisition that is never held across an `.await`.
pub struct Pool<M: Manager> {
    shared: Arc<Shared<M>>,
}

impl<M: Manager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: Manager> std::fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("config", &self.shared.config)
            .field("status", &self.status())
            .finish()
    }
}

impl<M: Manager> Pool<M> {
    /// Builds the pool and, when called inside a Tokio runtime, starts the
    /// idle reaper. The reaper stops once every handle to the pool is gone.
    pub fn new(manager: M, config: PoolConfig) -> Self {
        if config.max_size == 0 {
            warn!("pool max_size 0 is not usable, using 1");
        }
        let max_size = config.max_size.max(1);
        let config = PoolConfig { max_size, ..config };
        let shared = Arc::new(Shared {
            manager,
            permits: Arc::new(Semaphore::new(max_size)),
            state: Mutex::new(State {
                idle: Vec::new(),
                total: 0,
                in_use: 0,
                closed: false,
            }),
            config,
        });
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(reap_loop(Arc::downgrade(&shared)));
            }
            Err(_) => warn!(
                "pool created outside a Tokio runtime, idle entries are only reaped by reap_idle"
            ),
        }
        Self { shared }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn manager(&self) -> &M {
        &self.shared.manager
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.shared.lock();
        PoolStatus {
            max_size: self.shared.config.max_size,
            total: state.total,
            idle: state.idle.len(),
            in_use: state.in_use,
        }
    }

    pub async fn acquire(&self) -> Result<Pooled<M>, PoolError<M::Error>> {
        let permit = self.permit().await?;
        let (reused, stale) = {
            let mut state = self.shared.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            state.in_use += 1;
            let mut stale = Vec::new();
            let mut reused = None;
            while let Some(entry) = state.idle.pop() {
                if self.shared.manager.is_reusable(&entry.resource) {
                    reused = Some(entry.resource);
                    break;
                }
                stale.push(entry.resource);
            }
            state.total = state.total.saturating_sub(stale.len());
            if reused.is_none() {
                state.total += 1;
            }
            (reused, stale)
        };
        if let Some(resource) = reused {
            let pooled = Pooled {
                resource: Some(resource),
                permit: Some(permit),
                pool: self.clone(),
            };
            self.discard(stale).await;
            return Ok(pooled);
        }
        let mut reservation = Reservation {
            shared: &self.shared,
            armed: true,
        };
        self.discard(stale).await;
        let resource = self
            .shared
            .manager
            .create()
            .await
            .map_err(PoolError::CreateFailed)?;
        reservation.armed = false;
        debug!(status = ?self.status(), "created pooled resource");
        Ok(Pooled {
            resource: Some(resource),
            permit: Some(permit),
            pool: self.clone(),
        })
    }

    /// Destroys idle entries that were already taken out of the count.
    async fn discard(&self, stale: Vec<M::Resource>) {
        if stale.is_empty() {
            return;
        }
        debug!(stale = stale.len(), "dropping idle resources that are no longer usable");
        for resource in stale {
            self.shared.manager.destroy(resource).await;
        }
    }

    async fn permit(&self) -> Result<OwnedSemaphorePermit, PoolError<M::Error>> {
        let permits = Arc::clone(&self.shared.permits);
        match self.shared.config.acquire {
            AcquirePolicy::FailFast => permits.try_acquire_owned().map_err(|err| match err {
                TryAcquireError::NoPermits => PoolError::Exhausted(self.shared.config.max_size),
                TryAcquireError::Closed => PoolError::Closed,
            }),
            AcquirePolicy::Wait { timeout: None } => {
                permits.acquire_owned().await.map_err(|_| PoolError::Closed)
            }
            AcquirePolicy::Wait {
                timeout: Some(limit),
            } => match tokio::time::timeout(limit, permits.acquire_owned()).await {
                Ok(Ok(permit)) => Ok(permit),
                Ok(Err(_)) => Err(PoolError::Closed),
                Err(_) => Err(PoolError::Timeout(limit)),
            },
        }
    }

    fn checkin(&self, resource: M::Resource) -> Option<M::Resource> {
        let mut state = self.shared.lock();
        state.in_use = state.in_use.saturating_sub(1);
        if state.closed {
            state.total = state.total.saturating_sub(1);
            return Some(resource);
        }
        state.idle.push(IdleEntry {
            resource,
            released_at: Instant::now(),
        });
        None
    }

    fn forget(&self) {
        let mut state = self.shared.lock();
        state.in_use = state.in_use.saturating_sub(1);
        state.total = state.total.saturating_sub(1);
    }

    /// Destroys idle entries that have been idle longer than `idle_timeout`
    /// or that the manager no longer considers reusable.
    pub async fn reap_idle(&self) -> usize {
        let idle_timeout = self.shared.config.idle_timeout;
        let manager = &self.shared.manager;
        let expired: Vec<M::Resource> = {
            let mut state = self.shared.lock();
            let now = Instant::now();
            let (expired, kept): (Vec<_>, Vec<_>) = state.idle.drain(..).partition(|entry| {
                now.duration_since(entry.released_at) > idle_timeout
                    || !manager.is_reusable(&entry.resource)
            });
            state.idle = kept;
            state.total = state.total.saturating_sub(expired.len());
            expired.into_iter().map(|entry| entry.resource).collect()
        };
        let reaped = expired.len();
        for resource in expired {
            self.shared.manager.destroy(resource).await;
        }
        if reaped > 0 {
            info!(reaped, status = ?self.status(), "reaped idle resources");
        }
        reaped
    }

    /// Rejects further acquires and destroys every idle entry. Entries still
    /// in use are destroyed when their holder gives them back.
    pub async fn close(&self) {
        let idle: Vec<M::Resource> = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let idle: Vec<_> = state.idle.drain(..).map(|entry| entry.resource).collect();
            state.total = state.total.saturating_sub(idle.len());
            idle
        };
        self.shared.permits.close();
        let closed = idle.len();
        for resource in idle {
            self.shared.manager.destroy(resource).await;
        }
        debug!(closed, "pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

/// Gives back a slot reserved for a resource whose creation did not finish.
struct Reservation<'a, M: Manager> {
    shared: &'a Shared<M>,
    armed: bool,
}

impl<M: Manager> Drop for Reservation<'_, M> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.shared.lock();
            state.in_use = state.in_use.saturating_sub(1);
            state.total = state.total.saturating_sub(1);
        }
    }
}

async fn reap_loop<M: Manager>(shared: Weak<Shared<M>>) {
    let period = match shared.upgrade() {
        Some(shared) => shared.config.reap_interval.max(Duration::from_millis(1)),
        None => return,
    };
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let pool = Pool { shared };
        if pool.is_closed() {
            return;
        }
        pool.reap_idle().await;
    }
}

/// A resource checked out of a [`Pool`].
///
/// Hand it back with [`Pooled::release`] when it is known to be healthy, or
/// [`Pooled::destroy`] when it is suspect. Dropping it without either
/// destroys it.
pub struct Pooled<M: Manager> {
    resource: Option<M::Resource>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Pool<M>,
}

impl<M: Manager> Pooled<M> {
    pub async fn release(mut self) {
        let Some(resource) = self.resource.take() else {
            return;
        };
        let leftover = self.pool.checkin(resource);
        // The idle entry is visible before the next waiter is woken.
        drop(self.permit.take());
        if let Some(resource) = leftover {
            self.pool.shared.manager.destroy(resource).await;
        }
    }

    pub async fn destroy(mut self) {
        let Some(resource) = self.resource.take() else {
            return;
        };
        self.pool.forget();
        drop(self.permit.take());
        self.pool.shared.manager.destroy(resource).await;
        debug!(status = ?self.pool.status(), "destroyed pooled resource");
    }
}

impl<M: Manager> Deref for Pooled<M> {
    type Target = M::Resource;

    fn deref(&self) -> &Self::Target {
        self.resource.as_ref().expect("pooled resource already returned")
    }
}

impl<M: Manager> DerefMut for Pooled<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource.as_mut().expect("pooled resource already returned")
    }
}

impl<M: Manager> Drop for Pooled<M> {
    fn drop(&mut self) {
        let Some(resource) = self.resource.take() else {
            return;
        };
        self.pool.forget();
        drop(self.permit.take());
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = self.pool.clone();
                handle.spawn(async move {
                    pool.shared.manager.destroy(resource).await;
                });
            }
            Err(_) => drop(resource),
        }
    }
}
