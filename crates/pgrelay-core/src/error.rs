use thiserror::Error;

/// Failures raised while decoding the length-prefixed wire framing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("malformed header: no length delimiter within {0} bytes")]
    MalformedHeader(usize),
    #[error("invalid message length {0:?}")]
    InvalidLength(String),
    #[error("could not parse message: {0}")]
    ParseError(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address {0:?} has no scheme")]
    MissingScheme(String),
    #[error("unknown scheme {scheme:?} in address {address:?}")]
    UnknownScheme { scheme: String, address: String },
    #[error("invalid remote address {address:?}: {reason}")]
    InvalidRemote { address: String, reason: String },
}
