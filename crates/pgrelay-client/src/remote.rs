use crate::client::ClientSettings;
use crate::error::ClientError;
use async_trait::async_trait;
use pgrelay_core::{Message, QueryResult, Response};
use pgrelay_pool::{Manager, Pool, PoolStatus};
use pgrelay_protocol::{write_frame, FrameReader, StreamError};
use serde_json::Value;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// An open socket to a proxy plus the decoder state for its responses.
#[derive(Debug)]
pub struct RemoteSocket {
    stream: TcpStream,
    reader: FrameReader<Response>,
}

impl RemoteSocket {
    async fn exchange(&mut self, msg: &Message) -> Result<Response, StreamError> {
        write_frame(&mut self.stream, msg).await?;
        self.reader.read_frame(&mut self.stream).await
    }

    /// False once the proxy has hung up, sent bytes nobody asked for, or left
    /// part of a frame buffered.
    fn is_open(&self) -> bool {
        if self.reader.has_pending() {
            return false;
        }
        let mut buf = [0u8; 1];
        matches!(
            self.stream.try_read(&mut buf),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock
        )
    }
}

pub struct RemoteManager {
    host: String,
    port: u16,
}

#[async_trait]
impl Manager for RemoteManager {
    type Resource = RemoteSocket;
    type Error = std::io::Error;

    async fn create(&self) -> Result<RemoteSocket, std::io::Error> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        debug!(host = %self.host, port = self.port, "opened proxy socket");
        Ok(RemoteSocket {
            stream,
            reader: FrameReader::default(),
        })
    }

    async fn destroy(&self, mut resource: RemoteSocket) {
        let _ = resource.stream.shutdown().await;
        debug!(host = %self.host, port = self.port, "closed proxy socket");
    }

    fn is_reusable(&self, resource: &RemoteSocket) -> bool {
        resource.is_open()
    }
}

/// Sends framed queries to a proxy over pooled sockets.
#[derive(Clone)]
pub struct RemoteClient {
    address: String,
    route: Option<String>,
    pool: Pool<RemoteManager>,
    query_timeout: Option<Duration>,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("address", &self.address)
            .field("route", &self.route)
            .field("status", &self.pool.status())
            .finish()
    }
}

impl RemoteClient {
    pub fn new(host: impl Into<String>, port: u16, settings: &ClientSettings) -> Self {
        let host = host.into();
        let address = format!("remote://{host}:{port}");
        Self {
            address,
            route: settings.route.clone(),
            pool: Pool::new(RemoteManager { host, port }, settings.pool.clone()),
            query_timeout: settings.query_timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sends one request frame and waits for its response frame.
    ///
    /// An `{error}` response is a failed query, and the socket is kept only
    /// if the proxy left it open. Transport and framing failures drop it.
    pub async fn query(&self, text: &str, params: &[Value]) -> Result<QueryResult, ClientError> {
        let mut socket = self
            .pool
            .acquire()
            .await
            .map_err(|source| ClientError::Proxy {
                address: self.address.clone(),
                source,
            })?;
        let msg = Message {
            query: text.to_string(),
            params: (!params.is_empty()).then(|| params.to_vec()),
            address: self.route.clone(),
        };
        let outcome = match self.query_timeout {
            Some(limit) => {
                let attempt = tokio::time::timeout(limit, socket.exchange(&msg)).await;
                let Ok(outcome) = attempt else {
                    warn!(
                        address = %self.address,
                        ?limit,
                        "proxy query timed out, dropping socket"
                    );
                    socket.destroy().await;
                    return Err(ClientError::Timeout {
                        address: self.address.clone(),
                        after: limit,
                    });
                };
                outcome
            }
            None => socket.exchange(&msg).await,
        };
        match outcome {
            Ok(response) => {
                if socket.is_open() {
                    socket.release().await;
                } else {
                    debug!(address = %self.address, "proxy closed the socket after answering");
                    socket.destroy().await;
                }
                response.into_result().map_err(ClientError::Remote)
            }
            Err(source) => {
                debug!(address = %self.address, "dropping proxy socket: {source}");
                socket.destroy().await;
                Err(ClientError::Transport {
                    address: self.address.clone(),
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
