pub mod backend;
pub mod client;
pub mod driver;
pub mod error;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod registry;
pub mod remote;
pub mod stub;

pub use backend::BackendClient;
pub use client::{Client, ClientSettings};
pub use driver::{BackendConnection, BackendDriver, DriverError, DriverErrorKind};
pub use error::ClientError;
pub use registry::{default_drivers, ClientRegistry};
pub use remote::RemoteClient;
pub use stub::StubDriver;
