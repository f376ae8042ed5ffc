//! Publisher side of a channel
//!
//! An ingest session owns one publishing connection. It negotiates the header set, takes
//! over the channel, and pumps packets until the publisher leaves, is preempted by a
//! newer publisher, or the server shuts down.

use std::sync::Arc;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::registry::{ChannelRef, PublishToken, RelayError};
use crate::server::config::ServerConfig;
use crate::server::connection::MediaConnection;
use crate::server::handler::{AllowAll, AuthResult, PublishAuthorizer};
use crate::stats::SessionStats;

use super::context::SessionContext;

pub struct IngestSession<C> {
    ctx: SessionContext,
    channel: ChannelRef,
    conn: C,
    config: ServerConfig,
    authorizer: Arc<dyn PublishAuthorizer>,
    publish_key: Option<String>,
    cancel: CancellationToken,
    stats: SessionStats,
}

impl<C: MediaConnection> IngestSession<C> {
    pub fn new(ctx: SessionContext, channel: ChannelRef, conn: C, config: ServerConfig) -> Self {
        Self {
            ctx,
            channel,
            conn,
            config,
            authorizer: Arc::new(AllowAll),
            publish_key: None,
            cancel: CancellationToken::new(),
            stats: SessionStats::new(),
        }
    }

    /// Check `publish_key` with `authorizer` before taking over the channel
    pub fn with_authorizer(
        mut self,
        authorizer: Arc<dyn PublishAuthorizer>,
        publish_key: Option<String>,
    ) -> Self {
        self.authorizer = authorizer;
        self.publish_key = publish_key;
        self
    }

    /// Stop publishing when `cancel` fires
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Run the session to completion
    ///
    /// The channel is always handed back (end of publish) and the connection closed,
    /// whatever the outcome. Preemption surfaces as [`RelayError::StaleGeneration`].
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!(
            session_id = self.ctx.session_id,
            peer = %self.ctx.peer_addr,
            channel = %self.channel.name(),
            "Publisher connected"
        );

        let result = self.publish().await;

        if let Err(e) = self.conn.close().await {
            tracing::trace!(session_id = self.ctx.session_id, error = %e, "Close failed");
        }

        tracing::info!(
            session_id = self.ctx.session_id,
            channel = %self.channel.name(),
            packets = self.stats.packets,
            bytes = self.stats.bytes,
            keyframes = self.stats.keyframes,
            bitrate = self.stats.bitrate(),
            duration_ms = self.stats.duration().as_millis() as u64,
            "Publisher finished"
        );

        result
    }

    async fn publish(&mut self) -> Result<()> {
        let auth = self
            .authorizer
            .authorize_publish(&self.ctx, self.channel.name(), self.publish_key.as_deref())
            .await;
        if let AuthResult::Reject(reason) = auth {
            tracing::info!(
                session_id = self.ctx.session_id,
                channel = %self.channel.name(),
                reason = %reason,
                "Publish rejected"
            );
            self.refuse(&reason).await;
            return Err(Error::Unauthorized(reason));
        }

        let headers = match timeout(self.config.handshake_timeout, self.conn.negotiate_header())
            .await
        {
            Ok(Ok(headers)) => headers,
            Ok(Err(e)) => {
                self.refuse(&e.to_string()).await;
                return Err(e);
            }
            Err(_) => {
                self.refuse("timed out waiting for stream header").await;
                return Err(Error::Timeout);
            }
        };

        let token = match self.channel.begin_publish(headers) {
            Ok(token) => token,
            Err(e) => {
                self.refuse(&e.to_string()).await;
                return Err(e.into());
            }
        };

        let result = self.pump(&token).await;
        self.channel.end_publish(&token);
        result
    }

    async fn pump(&mut self, token: &PublishToken) -> Result<()> {
        loop {
            let read = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    tracing::debug!(session_id = self.ctx.session_id, "Publisher stopped by shutdown");
                    return Ok(());
                }
                _ = token.preempted() => {
                    return Err(RelayError::StaleGeneration.into());
                }
                read = timeout(self.config.idle_timeout, self.conn.read_packet()) => read,
            };

            let Some(packet) = read.map_err(|_| Error::Timeout)?? else {
                return Ok(());
            };

            self.stats.on_packet(&packet);
            self.channel.publish_packet(token, packet)?;
        }
    }

    async fn refuse(&mut self, reason: &str) {
        if let Err(e) = self.conn.reject(reason).await {
            tracing::trace!(session_id = self.ctx.session_id, error = %e, "Reject failed");
        }
    }
}
