//! Channel and registry error types

/// Error type for channel operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// The publish token belongs to a superseded or ended generation
    #[error("publish generation is no longer current")]
    StaleGeneration,

    /// Viewer attached before any publish began
    #[error("channel not currently live: {0}")]
    ChannelNotLive(String),

    /// Publisher offered no usable codec headers
    #[error("header negotiation failed: {0}")]
    HeaderNegotiationFailed(String),

    /// The registry already discarded this channel
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}
