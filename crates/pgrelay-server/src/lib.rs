pub mod config;
pub mod connection;
pub mod metrics;
pub mod server;

pub use config::Config;
pub use connection::{CloseReason, ConnectionSettings, ConnectionState, ProxyConnection};
pub use server::{ProxyHandle, ProxyServer, ServerError, ServerSettings};
