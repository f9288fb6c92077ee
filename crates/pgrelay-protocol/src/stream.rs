use crate::codec::{encode, Decoder};
use bytes::BytesMut;
use pgrelay_core::FrameError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::VecDeque;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("could not encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("connection closed by peer")]
    Closed,
    #[error("connection closed mid-frame")]
    Truncated,
}

pub async fn write_frame<S, T>(stream: &mut S, msg: &T) -> Result<(), StreamError>
where
    S: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let buf = encode(msg)?;
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads whole frames from a stream the caller owns.
///
/// Frames that arrive together are queued and handed out one per call; a
/// decode error is reported only after the frames decoded ahead of it.
#[derive(Debug)]
pub struct FrameReader<T> {
    decoder: Decoder<T>,
    buf: BytesMut,
    ready: VecDeque<T>,
    failed: Option<FrameError>,
}

impl<T: DeserializeOwned> Default for FrameReader<T> {
    fn default() -> Self {
        Self::new(Decoder::new())
    }
}

impl<T: DeserializeOwned> FrameReader<T> {
    pub fn new(decoder: Decoder<T>) -> Self {
        Self {
            decoder,
            buf: BytesMut::with_capacity(8 * 1024),
            ready: VecDeque::new(),
            failed: None,
        }
    }

    /// True when a frame or error is waiting, or a frame is half read.
    pub fn has_pending(&self) -> bool {
        !self.ready.is_empty() || self.failed.is_some() || self.decoder.has_partial()
    }

    pub async fn read_frame<S: AsyncRead + Unpin>(
        &mut self,
        stream: &mut S,
    ) -> Result<T, StreamError> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(frame);
            }
            if let Some(err) = self.failed.take() {
                return Err(err.into());
            }
            self.buf.clear();
            let n = stream.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(if self.decoder.has_partial() {
                    StreamError::Truncated
                } else {
                    StreamError::Closed
                });
            }
            let feed = self.decoder.feed(&self.buf);
            self.ready.extend(feed.frames);
            self.failed = feed.error;
        }
    }
}
