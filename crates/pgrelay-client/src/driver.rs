use async_trait::async_trait;
use pgrelay_core::QueryResult;
use serde_json::Value;
use thiserror::Error;

/// Whether a failed call leaves the connection usable.
///
/// Every driver decides this for its own errors: `Query` means the statement
/// failed but the session is fine, `Connection` means the session must not be
/// reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    Query,
    Connection,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DriverError {
    kind: DriverErrorKind,
    message: String,
}

impl DriverError {
    pub fn query(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Query,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: DriverErrorKind::Connection,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> DriverErrorKind {
        self.kind
    }

    pub fn is_connection_level(&self) -> bool {
        self.kind == DriverErrorKind::Connection
    }
}

#[async_trait]
pub trait BackendDriver: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn connect(&self, url: &str) -> Result<Box<dyn BackendConnection>, DriverError>;
}

#[async_trait]
pub trait BackendConnection: Send {
    async fn query(&mut self, text: &str, params: &[Value]) -> Result<QueryResult, DriverError>;

    async fn close(self: Box<Self>);
}
