use crate::driver::DriverError;
use pgrelay_core::{AddressError, DriverKind};
use pgrelay_pool::PoolError;
use pgrelay_protocol::StreamError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error("{0} driver is not available in this build")]
    DriverUnavailable(DriverKind),
    #[error("could not connect to {address}: {source}")]
    Backend {
        address: String,
        source: PoolError<DriverError>,
    },
    #[error("could not connect to {address}: {source}")]
    Proxy {
        address: String,
        source: PoolError<std::io::Error>,
    },
    #[error("could not run query {query}: {source}")]
    Query { query: String, source: DriverError },
    #[error("lost connection to {address}: {source}")]
    Transport { address: String, source: StreamError },
    #[error("query to {address} timed out after {after:?}")]
    Timeout {
        address: String,
        after: std::time::Duration,
    },
    #[error("{0}")]
    Remote(String),
    #[error("all {0} pooled clients are busy, cannot open another address")]
    TooManyClients(usize),
}
