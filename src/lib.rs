//! Live broadcast ingest and relay
//!
//! Publishers push an FLV stream into a named channel; any number of viewers play it
//! back live. Each channel keeps a bounded ring of recent packets so late joiners start
//! at a keyframe and slow viewers skip ahead instead of stalling the publisher.
//!
//! ```no_run
//! use vodstream::{AllowAll, RelayServer, ServerConfig};
//!
//! # async fn run() -> vodstream::Result<()> {
//! let server = RelayServer::new(ServerConfig::default(), AllowAll);
//! server.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await
//! # }
//! ```

pub mod auth;
pub mod error;
pub mod media;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;

pub use error::{Error, Result};
pub use media::{HeaderSet, Packet, RingBuffer, TrackHeader, TrackKind};
pub use registry::{
    BlockingPolicy, Channel, ChannelRef, ChannelRegistry, ChannelState, PublishToken,
    ReadEvent, RelayConfig, RelayError, Skipped, ViewerCursor,
};
pub use server::{AllowAll, AuthResult, PublishAuthorizer, RelayServer, ServerConfig};
pub use session::{IngestSession, SessionContext, ViewerSession};
