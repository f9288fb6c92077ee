use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError<E> {
    #[error("could not create pooled resource: {0}")]
    CreateFailed(E),
    #[error("pool exhausted: all {0} resources in use")]
    Exhausted(usize),
    #[error("timed out after {0:?} waiting for a pooled resource")]
    Timeout(Duration),
    #[error("pool is closed")]
    Closed,
}
