pub mod config;
pub mod error;
pub mod pool;

pub use config::{AcquirePolicy, PoolConfig};
pub use error::PoolError;
pub use pool::{Manager, Pool, PoolStatus, Pooled};
