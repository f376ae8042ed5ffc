//! Session context
//!
//! Identifies a session in logs and in authorization callbacks.

use std::net::SocketAddr;
use std::time::Instant;

/// Whether a session publishes into or plays from its channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Publisher,
    Viewer,
}

/// Read-only information about one connection
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Unique session ID
    pub session_id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Channel named in the request (empty until the request line is read)
    pub channel: String,

    /// Set once the request line is read
    pub role: Option<SessionRole>,

    pub connected_at: Instant,
}

impl SessionContext {
    pub fn new(session_id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            session_id,
            peer_addr,
            channel: String::new(),
            role: None,
            connected_at: Instant::now(),
        }
    }

    /// Record what the peer asked for
    pub fn with_request(mut self, channel: impl Into<String>, role: SessionRole) -> Self {
        self.channel = channel.into();
        self.role = Some(role);
        self
    }
}
