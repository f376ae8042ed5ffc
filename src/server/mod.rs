//! Relay server
//!
//! Accepts TCP connections, reads each one's request line and hands it to an ingest
//! or viewer session.

pub mod config;
pub mod connection;
pub mod handler;
pub mod listener;

pub use config::ServerConfig;
pub use connection::{FlvConnection, MediaConnection, Request};
pub use handler::{AllowAll, AuthResult, PublishAuthorizer};
pub use listener::RelayServer;
