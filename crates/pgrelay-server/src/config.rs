use crate::connection::ConnectionSettings;
use crate::server::ServerSettings;
use pgrelay_client::ClientSettings;
use pgrelay_core::{Address, DEFAULT_PROXY_PORT};
use pgrelay_pool::AcquirePolicy;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub max_connections: usize,
    /// Backend used when a request carries no `address` of its own.
    pub default_address: Option<String>,
    pub frame_timeout_ms: u64,
    pub max_frame_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: format!("127.0.0.1:{DEFAULT_PROXY_PORT}"),
            max_connections: 1024,
            default_address: None,
            frame_timeout_ms: 30_000,
            max_frame_bytes: pgrelay_protocol::DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ServerConfig {
    /// Keeps the configured host and swaps in `port`.
    pub fn set_port(&mut self, port: u16) {
        let host = match self.listen_addr.rsplit_once(':') {
            Some((host, _)) => host,
            None => self.listen_addr.as_str(),
        };
        let host = if host.is_empty() { "0.0.0.0" } else { host };
        self.listen_addr = format!("{host}:{port}");
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AcquireMode {
    Wait,
    FailFast,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PoolConfig {
    pub max_size: usize,
    pub idle_timeout_ms: u64,
    pub reap_interval_ms: u64,
    pub acquire: AcquireMode,
    pub acquire_timeout_ms: Option<u64>,
    pub query_timeout_ms: Option<u64>,
    /// Address forwarded with every request sent to another proxy.
    pub route: Option<String>,
    /// Distinct backend addresses kept open at once, one pool each.
    pub max_clients: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            idle_timeout_ms: 30_000,
            reap_interval_ms: 1_000,
            acquire: AcquireMode::Wait,
            acquire_timeout_ms: Some(5_000),
            query_timeout_ms: Some(30_000),
            route: None,
            max_clients: 256,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MetricsConfig {
    pub listen_addr: Option<String>,
}

impl Config {
    pub fn from_path(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.listen_addr.is_empty() {
            return Err(anyhow::anyhow!("server.listen_addr must not be empty"));
        }
        if self.server.max_connections == 0 {
            return Err(anyhow::anyhow!("server.max_connections must be at least 1"));
        }
        if self.server.frame_timeout_ms == 0 {
            return Err(anyhow::anyhow!("server.frame_timeout_ms must be at least 1"));
        }
        if self.server.max_frame_bytes == 0 {
            return Err(anyhow::anyhow!("server.max_frame_bytes must be at least 1"));
        }
        if let Some(address) = &self.server.default_address {
            Address::parse(address)
                .map_err(|err| anyhow::anyhow!("server.default_address is invalid: {err}"))?;
        }
        if self.pool.max_size == 0 {
            return Err(anyhow::anyhow!("pool.max_size must be at least 1"));
        }
        if self.pool.max_clients == 0 {
            return Err(anyhow::anyhow!("pool.max_clients must be at least 1"));
        }
        if self.pool.reap_interval_ms == 0 {
            return Err(anyhow::anyhow!("pool.reap_interval_ms must be at least 1"));
        }
        if let Some(route) = &self.pool.route {
            Address::parse(route).map_err(|err| anyhow::anyhow!("pool.route is invalid: {err}"))?;
        }
        if let Some(addr) = &self.metrics.listen_addr {
            if addr.is_empty() {
                return Err(anyhow::anyhow!(
                    "metrics.listen_addr must not be empty when set"
                ));
            }
        }
        Ok(())
    }

    pub fn client_settings(&self) -> ClientSettings {
        let acquire = match self.pool.acquire {
            AcquireMode::Wait => AcquirePolicy::Wait {
                timeout: self.pool.acquire_timeout_ms.map(Duration::from_millis),
            },
            AcquireMode::FailFast => AcquirePolicy::FailFast,
        };
        ClientSettings {
            pool: pgrelay_pool::PoolConfig {
                max_size: self.pool.max_size,
                idle_timeout: Duration::from_millis(self.pool.idle_timeout_ms),
                reap_interval: Duration::from_millis(self.pool.reap_interval_ms),
                acquire,
            },
            query_timeout: self.pool.query_timeout_ms.map(Duration::from_millis),
            route: self.pool.route.clone(),
            max_clients: self.pool.max_clients,
        }
    }

    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            listen_addr: self.server.listen_addr.clone(),
            max_connections: self.server.max_connections,
            connection: ConnectionSettings {
                default_address: self.server.default_address.clone(),
                frame_timeout: Duration::from_millis(self.server.frame_timeout_ms),
                max_frame_len: self.server.max_frame_bytes,
            },
        }
    }
}
