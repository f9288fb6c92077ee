use crate::client::ClientSettings;
use crate::driver::{BackendConnection, BackendDriver, DriverError};
use crate::error::ClientError;
use async_trait::async_trait;
use pgrelay_core::QueryResult;
use pgrelay_pool::{Manager, Pool, PoolStatus};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Opens and closes backend sessions for one database address.
pub struct BackendManager {
    driver: Arc<dyn BackendDriver>,
    url: String,
}

#[async_trait]
impl Manager for BackendManager {
    type Resource = Box<dyn BackendConnection>;
    type Error = DriverError;

    async fn create(&self) -> Result<Self::Resource, Self::Error> {
        debug!(driver = self.driver.name(), url = %self.url, "opening backend connection");
        self.driver.connect(&self.url).await
    }

    async fn destroy(&self, resource: Self::Resource) {
        debug!(driver = self.driver.name(), url = %self.url, "closing backend connection");
        resource.close().await;
    }
}

/// Runs queries against one database through a bounded connection pool.
#[derive(Clone)]
pub struct BackendClient {
    url: String,
    pool: Pool<BackendManager>,
    query_timeout: Option<Duration>,
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClient")
            .field("url", &self.url)
            .field("status", &self.pool.status())
            .finish()
    }
}

impl BackendClient {
    pub fn new(
        driver: Arc<dyn BackendDriver>,
        url: impl Into<String>,
        settings: &ClientSettings,
    ) -> Self {
        let url = url.into();
        let manager = BackendManager {
            driver,
            url: url.clone(),
        };
        Self {
            url,
            pool: Pool::new(manager, settings.pool.clone()),
            query_timeout: settings.query_timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Runs one query on a pooled connection. The connection goes back to the
    /// pool unless the driver reports a connection-level failure or the query
    /// times out, in which case it is destroyed.
    pub async fn query(&self, text: &str, params: &[Value]) -> Result<QueryResult, ClientError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|source| ClientError::Backend {
                address: self.url.clone(),
                source,
            })?;
        let outcome = match self.query_timeout {
            Some(limit) => {
                let attempt = tokio::time::timeout(limit, conn.query(text, params)).await;
                let Ok(outcome) = attempt else {
                    warn!(url = %self.url, ?limit, "backend query timed out, dropping connection");
                    conn.destroy().await;
                    return Err(ClientError::Timeout {
                        address: self.url.clone(),
                        after: limit,
                    });
                };
                outcome
            }
            None => conn.query(text, params).await,
        };
        match outcome {
            Ok(result) => {
                conn.release().await;
                Ok(result)
            }
            Err(source) => {
                if source.is_connection_level() {
                    warn!(
                        url = %self.url,
                        "backend connection failed, removing from pool: {source}"
                    );
                    conn.destroy().await;
                } else {
                    conn.release().await;
                }
                Err(ClientError::Query {
                    query: text.to_string(),
                    source,
                })
            }
        }
    }

    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    pub async fn end(&self) {
        self.pool.close().await;
    }
}
