//! Viewer side of a channel
//!
//! A viewer session attaches to a live channel, sends the header set, then forwards
//! packets as the channel's cursor yields them. It ends when the publish generation ends,
//! the viewer hangs up, a write stalls past the write timeout, or the server shuts down.

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::media::HeaderSet;
use crate::registry::{BlockingPolicy, ChannelRef, ReadEvent, ViewerCursor};
use crate::server::config::ServerConfig;
use crate::server::connection::MediaConnection;
use crate::stats::SessionStats;

use super::context::SessionContext;

pub struct ViewerSession<C> {
    ctx: SessionContext,
    channel: ChannelRef,
    conn: C,
    config: ServerConfig,
    cancel: CancellationToken,
    stats: SessionStats,
}

impl<C: MediaConnection> ViewerSession<C> {
    pub fn new(ctx: SessionContext, channel: ChannelRef, conn: C, config: ServerConfig) -> Self {
        Self {
            ctx,
            channel,
            conn,
            config,
            cancel: CancellationToken::new(),
            stats: SessionStats::new(),
        }
    }

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
    /// The cursor is always detached and the connection closed on the way out.
    pub async fn run(&mut self) -> Result<()> {
        let result = self.play().await;

        if let Err(e) = self.conn.close().await {
            tracing::trace!(session_id = self.ctx.session_id, error = %e, "Close failed");
        }

        tracing::info!(
            session_id = self.ctx.session_id,
            channel = %self.channel.name(),
            packets = self.stats.packets,
            bytes = self.stats.bytes,
            skipped = self.stats.skipped_packets,
            discontinuities = self.stats.discontinuities,
            duration_ms = self.stats.duration().as_millis() as u64,
            "Viewer finished"
        );

        result
    }

    async fn play(&mut self) -> Result<()> {
        let (headers, mut cursor) = match self.channel.attach_viewer() {
            Ok(attached) => attached,
            Err(e) => {
                if let Err(err) = self.conn.reject(&e.to_string()).await {
                    tracing::trace!(session_id = self.ctx.session_id, error = %err, "Reject failed");
                }
                return Err(e.into());
            }
        };

        tracing::info!(
            session_id = self.ctx.session_id,
            peer = %self.ctx.peer_addr,
            channel = %self.channel.name(),
            viewer = cursor.id(),
            "Viewer connected"
        );

        let result = self.forward(&headers, &mut cursor).await;
        self.channel.detach_viewer(&cursor);
        result
    }

    async fn forward(&mut self, headers: &HeaderSet, cursor: &mut ViewerCursor) -> Result<()> {
        let write_timeout = self.config.write_timeout;

        timeout(write_timeout, self.conn.write_header(headers))
            .await
            .map_err(|_| Error::Timeout)??;

        loop {
            let event = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => return Ok(()),
                _ = self.conn.closed() => {
                    tracing::debug!(session_id = self.ctx.session_id, "Viewer hung up");
                    return Ok(());
                }
                event = self.channel.read_next(cursor, BlockingPolicy::Block) => event,
            };

            match event {
                ReadEvent::Packet { packet, skipped } => {
                    if let Some(skipped) = skipped {
                        self.stats.on_skip(skipped.0);
                        timeout(write_timeout, self.conn.write_discontinuity(skipped))
                            .await
                            .map_err(|_| Error::Timeout)??;
                    }

                    timeout(write_timeout, self.conn.write_packet(&packet))
                        .await
                        .map_err(|_| Error::Timeout)??;
                    self.stats.on_packet(&packet);
                }
                ReadEvent::EndOfStream => {
                    tracing::debug!(session_id = self.ctx.session_id, "Publish generation ended");
                    return Ok(());
                }
                ReadEvent::WouldBlock => {}
            }
        }
    }
}
