use crate::backend::BackendClient;
use crate::client::{Client, ClientSettings};
use crate::driver::BackendDriver;
use crate::error::ClientError;
use crate::remote::RemoteClient;
use crate::stub::StubDriver;
use pgrelay_core::{Address, DriverKind, QueryResult};
use pgrelay_pool::PoolStatus;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{info, warn};

/// Drivers compiled into this build.
pub fn default_drivers() -> HashMap<DriverKind, Arc<dyn BackendDriver>> {
    let mut drivers: HashMap<DriverKind, Arc<dyn BackendDriver>> = HashMap::new();
    drivers.insert(DriverKind::Stub, Arc::new(StubDriver));
    #[cfg(feature = "postgres")]
    drivers.insert(DriverKind::Postgres, Arc::new(crate::postgres::PostgresDriver));
    drivers
}

struct Entry {
    client: Client,
    last_used: Instant,
}

struct RegistryInner {
    settings: ClientSettings,
    drivers: HashMap<DriverKind, Arc<dyn BackendDriver>>,
    clients: Mutex<HashMap<String, Entry>>,
}

/// Address → pooled client map, shared by cloning.
///
/// Each distinct address string gets one client, and so one pool, created on
/// first use. At most `max_clients` are kept: a new address evicts the least
/// recently used client with nothing checked out, closing its pool, and is
/// refused when every client is busy.
#[derive(Clone)]
pub struct ClientRegistry {
    inner: Arc<RegistryInner>,
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("settings", &self.inner.settings)
            .field("clients", &self.statuses())
            .finish()
    }
}

impl ClientRegistry {
    pub fn new(settings: ClientSettings) -> Self {
        Self::with_drivers(settings, default_drivers())
    }

    pub fn with_drivers(
        settings: ClientSettings,
        drivers: HashMap<DriverKind, Arc<dyn BackendDriver>>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                settings,
                drivers,
                clients: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.inner.settings
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.inner.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn client(&self, address: &str) -> Result<Client, ClientError> {
        let mut clients = self.clients();
        if let Some(entry) = clients.get_mut(address) {
            entry.last_used = Instant::now();
            return Ok(entry.client.clone());
        }
        let client = self.build(Address::parse(address)?)?;
        let max_clients = self.inner.settings.max_clients.max(1);
        if clients.len() >= max_clients {
            let Some((evicted, entry)) = take_least_recent_idle(&mut clients) else {
                warn!(address, max_clients, "refusing new address, every client is busy");
                return Err(ClientError::TooManyClients(max_clients));
            };
            info!(address = %evicted, "evicted pooled client");
            close_in_background(entry.client);
        }
        info!(address, "created pooled client");
        clients.insert(
            address.to_string(),
            Entry {
                client: client.clone(),
                last_used: Instant::now(),
            },
        );
        Ok(client)
    }

    fn build(&self, address: Address) -> Result<Client, ClientError> {
        let settings = &self.inner.settings;
        match address {
            Address::Remote { host, port } => {
                Ok(Client::Remote(RemoteClient::new(host, port, settings)))
            }
            Address::Database { driver, url } => {
                let backend = self
                    .inner
                    .drivers
                    .get(&driver)
                    .cloned()
                    .ok_or(ClientError::DriverUnavailable(driver))?;
                Ok(Client::Backend(BackendClient::new(backend, url, settings)))
            }
        }
    }

    pub async fn query(
        &self,
        address: &str,
        text: &str,
        params: &[Value],
    ) -> Result<QueryResult, ClientError> {
        self.client(address)?.query(text, params).await
    }

    pub fn statuses(&self) -> Vec<(String, PoolStatus)> {
        let mut statuses: Vec<_> = self
            .clients()
            .iter()
            .map(|(address, entry)| (address.clone(), entry.client.status()))
            .collect();
        statuses.sort_by(|a, b| a.0.cmp(&b.0));
        statuses
    }

    /// Closes every pool and forgets every client.
    pub async fn end(&self) {
        let clients: Vec<Client> = self.clients().drain().map(|(_, entry)| entry.client).collect();
        for client in clients {
            client.end().await;
        }
    }
}

fn take_least_recent_idle(clients: &mut HashMap<String, Entry>) -> Option<(String, Entry)> {
    let address = clients
        .iter()
        .filter(|(_, entry)| entry.client.status().in_use == 0)
        .min_by_key(|(_, entry)| entry.last_used)
        .map(|(address, _)| address.clone())?;
    clients.remove_entry(&address)
}

fn close_in_background(client: Client) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { client.end().await });
        }
        Err(_) => drop(client),
    }
}
