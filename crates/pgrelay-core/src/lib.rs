pub mod address;
pub mod error;
pub mod types;

pub use address::{Address, DriverKind, DEFAULT_PROXY_PORT};
pub use error::{AddressError, FrameError};
pub use types::{Message, QueryResult, Response, Row};
