use crate::connection::{ConnectionSettings, ProxyConnection};
use crate::metrics::CONNECTIONS_ACTIVE;
use metrics::gauge;
use pgrelay_client::ClientRegistry;
use pgrelay_core::Response;
use pgrelay_protocol::write_frame;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, info_span, warn, Instrument};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen_addr: String,
    pub max_connections: usize,
    pub connection: ConnectionSettings,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen_addr: format!("127.0.0.1:{}", pgrelay_core::DEFAULT_PROXY_PORT),
            max_connections: 1024,
            connection: ConnectionSettings::default(),
        }
    }
}

/// Accepts framed client connections and serves each on its own task.
pub struct ProxyServer {
    listener: TcpListener,
    registry: ClientRegistry,
    settings: ServerSettings,
}

impl ProxyServer {
    pub async fn bind(
        settings: ServerSettings,
        registry: ClientRegistry,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&settings.listen_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: settings.listen_addr.clone(),
                source,
            })?;
        Ok(Self {
            listener,
            registry,
            settings,
        })
    }

    /// Binds and starts accepting in the background.
    pub async fn start(
        settings: ServerSettings,
        registry: ClientRegistry,
    ) -> Result<ProxyHandle, ServerError> {
        let server = Self::bind(settings, registry).await?;
        let local_addr = server.local_addr().map_err(|source| ServerError::Bind {
            addr: server.settings.listen_addr.clone(),
            source,
        })?;
        let (shutdown, signal) = watch::channel(false);
        let task = tokio::spawn(server.run(signal));
        info!("pgrelay listening on {local_addr}");
        Ok(ProxyHandle {
            local_addr,
            shutdown,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts until `shutdown` flips, then waits for every connection task.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let limit = Arc::new(Semaphore::new(self.settings.max_connections.max(1)));
        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = self.listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!("accept error: {err}");
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            continue;
                        }
                    };
                    if let Err(err) = socket.set_nodelay(true) {
                        debug!(%peer, "could not set TCP_NODELAY: {err}");
                    }
                    match Arc::clone(&limit).try_acquire_owned() {
                        Ok(permit) => {
                            let task = serve_socket(
                                socket,
                                self.registry.clone(),
                                self.settings.connection.clone(),
                                shutdown.clone(),
                                permit,
                            );
                            connections.spawn(task.instrument(info_span!("connection", %peer)));
                        }
                        Err(_) => {
                            warn!(
                                %peer,
                                limit = self.settings.max_connections,
                                "rejecting connection"
                            );
                            connections.spawn(reject(socket));
                        }
                    }
                }
            }
        }
        drop(self.listener);
        info!(open = connections.len(), "stopped accepting, waiting for connections");
        while connections.join_next().await.is_some() {}
    }
}

async fn serve_socket(
    socket: TcpStream,
    registry: ClientRegistry,
    settings: ConnectionSettings,
    shutdown: watch::Receiver<bool>,
    _permit: OwnedSemaphorePermit,
) {
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
    debug!("connection opened");
    let mut connection = ProxyConnection::new(socket, registry, settings, shutdown);
    let reason = connection.run().await;
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
    info!(?reason, "connection finished");
}

async fn reject(mut socket: TcpStream) {
    let _ = write_frame(&mut socket, &Response::error("too many connections")).await;
    let _ = socket.shutdown().await;
}

/// Handle to a running [`ProxyServer`]. Dropping it also shuts the server
/// down, without waiting.
#[derive(Debug)]
pub struct ProxyHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProxyHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting, tells every connection to close once its current
    /// request is answered, and waits for all of them. Safe to call twice.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!("proxy server task failed: {err}");
            }
            info!(addr = %self.local_addr, "proxy server closed");
        }
    }
}
