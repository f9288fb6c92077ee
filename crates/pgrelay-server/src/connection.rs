use crate::metrics::{PROTOCOL_ERRORS_TOTAL, QUERIES_TOTAL, QUERY_ERRORS_TOTAL};
use bytes::BytesMut;
use metrics::counter;
use pgrelay_client::ClientRegistry;
use pgrelay_core::{Message, Response};
use pgrelay_protocol::{write_frame, Decoder, DEFAULT_MAX_FRAME_LEN, DEFAULT_MAX_HEADER_LEN};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub default_address: Option<String>,
    /// How long a half-received frame may wait for more bytes.
    pub frame_timeout: Duration,
    pub max_frame_len: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            default_address: None,
            frame_timeout: Duration::from_secs(30),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// Why a connection stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed its side.
    Eof,
    Shutdown,
    /// A bad frame was answered with an error frame.
    ProtocolError,
    /// A partial frame stalled for longer than `frame_timeout`.
    FrameTimeout,
    Transport,
}

enum Input {
    Data,
    Eof,
    Stalled,
    Shutdown,
    Failed(std::io::Error),
}

/// Proxy side of one client socket.
///
/// Requests are answered one at a time in the order they arrive. A failed
/// query produces an error response and the connection stays open; a bad
/// frame produces one error response and closes it.
pub struct ProxyConnection<S> {
    stream: S,
    decoder: Decoder<Message>,
    buf: BytesMut,
    registry: ClientRegistry,
    settings: ConnectionSettings,
    shutdown: watch::Receiver<bool>,
    state: ConnectionState,
}

impl<S> ProxyConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        registry: ClientRegistry,
        settings: ConnectionSettings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let decoder = Decoder::with_limits(DEFAULT_MAX_HEADER_LEN, settings.max_frame_len);
        Self {
            stream,
            decoder,
            buf: BytesMut::with_capacity(8 * 1024),
            registry,
            settings,
            shutdown,
            state: ConnectionState::Open,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub async fn run(&mut self) -> CloseReason {
        let reason = self.serve().await;
        self.state = ConnectionState::Closed;
        let _ = self.stream.shutdown().await;
        debug!(?reason, "connection closed");
        reason
    }

    async fn serve(&mut self) -> CloseReason {
        loop {
            match self.next_input().await {
                Input::Data => {}
                Input::Eof => return CloseReason::Eof,
                Input::Shutdown => return CloseReason::Shutdown,
                Input::Failed(err) => {
                    debug!("read error: {err}");
                    return CloseReason::Transport;
                }
                Input::Stalled => {
                    counter!(PROTOCOL_ERRORS_TOTAL).increment(1);
                    warn!(timeout = ?self.settings.frame_timeout, "partial frame timed out");
                    let response = Response::error("timed out waiting for the rest of the frame");
                    let _ = write_frame(&mut self.stream, &response).await;
                    return CloseReason::FrameTimeout;
                }
            }
            let feed = self.decoder.feed(&self.buf);
            for msg in feed.frames {
                let response = answer(&self.registry, &self.settings, msg).await;
                if let Err(err) = write_frame(&mut self.stream, &response).await {
                    debug!("write error: {err}");
                    return CloseReason::Transport;
                }
            }
            if let Some(err) = feed.error {
                counter!(PROTOCOL_ERRORS_TOTAL).increment(1);
                warn!("protocol error: {err}");
                let _ = write_frame(&mut self.stream, &Response::error(err.to_string())).await;
                return CloseReason::ProtocolError;
            }
        }
    }

    /// Waits for the next chunk. Shutdown is only observed here, so a request
    /// already being answered always gets its response.
    async fn next_input(&mut self) -> Input {
        if *self.shutdown.borrow() {
            return Input::Shutdown;
        }
        self.buf.clear();
        let partial = self.decoder.has_partial();
        let frame_timeout = self.settings.frame_timeout;
        let stream = &mut self.stream;
        let buf = &mut self.buf;
        let read = async move {
            if partial {
                tokio::time::timeout(frame_timeout, stream.read_buf(buf)).await.ok()
            } else {
                Some(stream.read_buf(buf).await)
            }
        };
        tokio::select! {
            _ = self.shutdown.changed() => Input::Shutdown,
            read = read => match read {
                None => Input::Stalled,
                Some(Ok(0)) => Input::Eof,
                Some(Ok(_)) => Input::Data,
                Some(Err(err)) => Input::Failed(err),
            },
        }
    }
}

async fn answer(
    registry: &ClientRegistry,
    settings: &ConnectionSettings,
    msg: Message,
) -> Response {
    let address = msg
        .address
        .as_deref()
        .or(settings.default_address.as_deref());
    let Some(address) = address else {
        counter!(QUERY_ERRORS_TOTAL).increment(1);
        return Response::error(format!(
            "Could not run query {}: no backend address given",
            msg.query
        ));
    };
    if let Err(reason) = msg.validate_params() {
        counter!(QUERY_ERRORS_TOTAL).increment(1);
        return Response::error(format!("Could not run query {}: {reason}", msg.query));
    }
    debug!(address, query = %msg.query, "forwarding query");
    match registry.query(address, &msg.query, msg.params()).await {
        Ok(result) => {
            counter!(QUERIES_TOTAL).increment(1);
            Response::from(result)
        }
        Err(err) => {
            counter!(QUERY_ERRORS_TOTAL).increment(1);
            warn!(address, query = %msg.query, "query failed: {err}");
            Response::error(err.to_string())
        }
    }
}
