pub mod codec;
pub mod stream;

pub use codec::{encode, Decoder, Feed, DEFAULT_MAX_FRAME_LEN, DEFAULT_MAX_HEADER_LEN};
pub use stream::{write_frame, FrameReader, StreamError};

#[cfg(test)]
mod tests;
