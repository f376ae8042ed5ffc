//! Publish authorization hook
//!
//! The listener consults a [`PublishAuthorizer`] before a publisher is allowed to take
//! over a channel. Viewers are not checked.

use async_trait::async_trait;

use crate::session::SessionContext;

/// Outcome of an authorization check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    Accept,
    /// Rejected, with a reason sent back to the peer
    Reject(String),
}

impl AuthResult {
    pub fn is_accept(&self) -> bool {
        matches!(self, AuthResult::Accept)
    }
}

/// Pass/fail check for publish requests
#[async_trait]
pub trait PublishAuthorizer: Send + Sync + 'static {
    /// Decide whether `ctx` may publish to `channel` with `publish_key`
    async fn authorize_publish(
        &self,
        ctx: &SessionContext,
        channel: &str,
        publish_key: Option<&str>,
    ) -> AuthResult;
}

/// Accepts every publisher
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl PublishAuthorizer for AllowAll {
    async fn authorize_publish(
        &self,
        _ctx: &SessionContext,
        _channel: &str,
        _publish_key: Option<&str>,
    ) -> AuthResult {
        AuthResult::Accept
    }
}
