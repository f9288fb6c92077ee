use bytes::{BufMut, Bytes, BytesMut};
use pgrelay_core::FrameError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Longest header accepted before a `\n` must appear. `u64::MAX` has 20 digits.
pub const DEFAULT_MAX_HEADER_LEN: usize = 20;
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Encode `msg` as `decimal(len) "\n" json`, where `len` counts payload bytes.
pub fn encode<T: Serialize + ?Sized>(msg: &T) -> serde_json::Result<Bytes> {
    let payload = serde_json::to_vec(msg)?;
    let header = payload.len().to_string();
    let mut buf = BytesMut::with_capacity(header.len() + 1 + payload.len());
    buf.extend_from_slice(header.as_bytes());
    buf.put_u8(b'\n');
    buf.extend_from_slice(&payload);
    Ok(buf.freeze())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingHeader,
    AccumulatingPayload { pending: usize },
}

/// Result of feeding one chunk: every frame completed by it, in order, and
/// the error that stopped decoding, if any.
#[derive(Debug)]
pub struct Feed<T> {
    pub frames: Vec<T>,
    pub error: Option<FrameError>,
}

impl<T> Feed<T> {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.error.is_none()
    }
}

/// Incremental frame decoder.
///
/// Chunk boundaries need not line up with headers or payloads; one chunk may
/// complete several frames. After an error the decoder drops whatever it had
/// buffered and starts over at a header. Closing the transport is left to the
/// caller.
#[derive(Debug)]
pub struct Decoder<T> {
    state: State,
    header: BytesMut,
    payload: BytesMut,
    max_header_len: usize,
    max_frame_len: usize,
    _frame: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Default for Decoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Decoder<T> {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_HEADER_LEN, DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_limits(max_header_len: usize, max_frame_len: usize) -> Self {
        Self {
            state: State::AwaitingHeader,
            header: BytesMut::new(),
            payload: BytesMut::new(),
            max_header_len,
            max_frame_len,
            _frame: PhantomData,
        }
    }

    /// True while bytes of an unfinished frame are buffered.
    pub fn has_partial(&self) -> bool {
        match self.state {
            State::AwaitingHeader => !self.header.is_empty(),
            State::AccumulatingPayload { .. } => true,
        }
    }

    pub fn feed(&mut self, mut chunk: &[u8]) -> Feed<T> {
        let mut frames = Vec::new();
        loop {
            match self.state {
                State::AwaitingHeader => {
                    if chunk.is_empty() {
                        break;
                    }
                    match chunk.iter().position(|b| *b == b'\n') {
                        Some(idx) => {
                            self.header.extend_from_slice(&chunk[..idx]);
                            chunk = &chunk[idx + 1..];
                            let len = match self.parse_length() {
                                Ok(len) => len,
                                Err(err) => return self.fail(frames, err),
                            };
                            self.header.clear();
                            self.payload.clear();
                            self.payload.reserve(len.min(64 * 1024));
                            self.state = State::AccumulatingPayload { pending: len };
                        }
                        None => {
                            self.header.extend_from_slice(chunk);
                            chunk = &[];
                            if self.header.len() > self.max_header_len {
                                let err = FrameError::MalformedHeader(self.max_header_len);
                                return self.fail(frames, err);
                            }
                        }
                    }
                }
                State::AccumulatingPayload { pending } if pending > 0 => {
                    if chunk.is_empty() {
                        break;
                    }
                    let take = pending.min(chunk.len());
                    self.payload.extend_from_slice(&chunk[..take]);
                    chunk = &chunk[take..];
                    self.state = State::AccumulatingPayload {
                        pending: pending - take,
                    };
                }
                State::AccumulatingPayload { .. } => {
                    self.state = State::AwaitingHeader;
                    let payload = self.payload.split();
                    match serde_json::from_slice::<T>(&payload) {
                        Ok(frame) => frames.push(frame),
                        Err(err) => {
                            return self.fail(frames, FrameError::ParseError(err.to_string()));
                        }
                    }
                }
            }
        }
        Feed {
            frames,
            error: None,
        }
    }

    fn parse_length(&self) -> Result<usize, FrameError> {
        let invalid =
            || FrameError::InvalidLength(String::from_utf8_lossy(&self.header).into_owned());
        if self.header.is_empty() || !self.header.iter().all(u8::is_ascii_digit) {
            return Err(invalid());
        }
        let len = std::str::from_utf8(&self.header)
            .ok()
            .and_then(|digits| digits.parse::<usize>().ok())
            .ok_or_else(invalid)?;
        if len > self.max_frame_len {
            return Err(invalid());
        }
        Ok(len)
    }

    fn fail(&mut self, frames: Vec<T>, err: FrameError) -> Feed<T> {
        self.state = State::AwaitingHeader;
        self.header.clear();
        self.payload.clear();
        Feed {
            frames,
            error: Some(err),
        }
    }
}
