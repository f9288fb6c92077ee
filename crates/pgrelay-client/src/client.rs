use crate::backend::BackendClient;
use crate::remote::RemoteClient;
use crate::error::ClientError;
use pgrelay_core::QueryResult;
use pgrelay_pool::{PoolConfig, PoolStatus};
use serde_json::Value;
use std::time::Duration;

/// Settings applied to every client a registry builds.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub pool: PoolConfig,
    /// Longest a single query may take before its connection is dropped.
    pub query_timeout: Option<Duration>,
    /// Routing override sent with every request a `RemoteClient` makes.
    pub route: Option<String>,
    /// Most distinct addresses a registry keeps a client for.
    pub max_clients: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            query_timeout: Some(Duration::from_secs(30)),
            route: None,
            max_clients: 256,
        }
    }
}

/// A client resolved once from an address scheme.
#[derive(Debug, Clone)]
pub enum Client {
    Backend(BackendClient),
    Remote(RemoteClient),
}

impl Client {
    pub async fn query(&self, text: &str, params: &[Value]) -> Result<QueryResult, ClientError> {
        match self {
            Client::Backend(client) => client.query(text, params).await,
            Client::Remote(client) => client.query(text, params).await,
        }
    }

    pub fn status(&self) -> PoolStatus {
        match self {
            Client::Backend(client) => client.status(),
            Client::Remote(client) => client.status(),
        }
    }

    pub async fn end(&self) {
        match self {
            Client::Backend(client) => client.end().await,
            Client::Remote(client) => client.end().await,
        }
    }
}
