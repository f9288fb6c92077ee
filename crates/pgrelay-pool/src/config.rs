use std::time::Duration;

/// What `acquire` does when every slot is in use. Fixed per pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquirePolicy {
    /// Queue behind earlier callers until a slot frees up, optionally giving
    /// up after `timeout`.
    Wait { timeout: Option<Duration> },
    /// Fail with `PoolError::Exhausted` straight away.
    FailFast,
}

impl Default for AcquirePolicy {
    fn default() -> Self {
        AcquirePolicy::Wait { timeout: None }
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Most resources alive at once. `Pool::new` raises 0 to 1 and logs a
    /// warning.
    pub max_size: usize,
    pub idle_timeout: Duration,
    /// How often the background reaper runs. The reaper is only started when
    /// the pool is built inside a Tokio runtime; otherwise call
    /// `Pool::reap_idle` yourself.
    pub reap_interval: Duration,
    pub acquire: AcquirePolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            idle_timeout: Duration::from_secs(30),
            reap_interval: Duration::from_secs(1),
            acquire: AcquirePolicy::default(),
        }
    }
}
