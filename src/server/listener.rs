//! Relay server listener
//!
//! Handles the TCP accept loop and spawns one session per connection.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::registry::{ChannelRegistry, RelayConfig};
use crate::server::config::ServerConfig;
use crate::server::connection::{FlvConnection, MediaConnection, Request};
use crate::server::handler::PublishAuthorizer;
use crate::session::{IngestSession, SessionContext, SessionRole, ViewerSession};

/// Reply sent to connections turned away by `max_connections`
const CONNECTION_LIMIT_REACHED: &str = "connection limit reached";

/// Live relay server
pub struct RelayServer<A: PublishAuthorizer> {
    config: ServerConfig,
    authorizer: Arc<A>,
    registry: Arc<ChannelRegistry>,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
    /// Parent of every session's cancellation token
    shutdown: CancellationToken,
}

impl<A: PublishAuthorizer> RelayServer<A> {
    /// Create a new server with the given configuration and authorizer
    pub fn new(config: ServerConfig, authorizer: A) -> Self {
        Self::with_relay_config(config, authorizer, RelayConfig::default())
    }

    /// Create a new server with custom channel configuration
    pub fn with_relay_config(
        config: ServerConfig,
        authorizer: A,
        relay_config: RelayConfig,
    ) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            authorizer: Arc::new(authorizer),
            registry: Arc::new(ChannelRegistry::with_config(relay_config)),
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
            shutdown: CancellationToken::new(),
        }
    }

    /// Get a reference to the channel registry
    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Run the server
    ///
    /// This method blocks until the process exits.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server until `shutdown` resolves
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Accept connections on an already bound listener until `shutdown` resolves
    ///
    /// Every running session is cancelled on the way out.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(addr = %listener.local_addr()?, "Relay server listening");

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
            }
            _ = self.accept_loop(&listener) => {}
        }

        self.shutdown.cancel();
        Ok(())
    }

    async fn accept_loop(&self, listener: &TcpListener) {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    let write_timeout = self.config.write_timeout;
                    tokio::spawn(async move {
                        let mut conn = FlvConnection::new(socket);
                        match timeout(write_timeout, conn.reject(CONNECTION_LIMIT_REACHED)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                tracing::trace!(peer = %peer_addr, error = %e, "Reject failed")
                            }
                            Err(_) => tracing::trace!(peer = %peer_addr, "Reject timed out"),
                        }
                    });
                    return;
                }
            }
        } else {
            None
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            "New connection"
        );

        if let Err(e) = self.configure_socket(&socket) {
            tracing::error!(error = %e, "Failed to configure socket");
            return;
        }

        let config = self.config.clone();
        let authorizer: Arc<dyn PublishAuthorizer> = self.authorizer.clone();
        let registry = Arc::clone(&self.registry);
        let cancel = self.shutdown.child_token();

        tokio::spawn(async move {
            let _permit = permit;
            let ctx = SessionContext::new(session_id, peer_addr);

            if let Err(e) = serve_connection(ctx, socket, config, authorizer, registry, cancel).await
            {
                if e.is_benign() {
                    tracing::debug!(session_id = session_id, error = %e, "Session ended");
                } else {
                    tracing::warn!(session_id = session_id, error = %e, "Session failed");
                }
            }

            tracing::debug!(session_id = session_id, "Connection closed");
        });
    }

    fn configure_socket(&self, socket: &TcpStream) -> std::io::Result<()> {
        if self.config.tcp_nodelay {
            socket.set_nodelay(true)?;
        }
        Ok(())
    }
}

/// Read the request line and run the session it asks for
async fn serve_connection(
    ctx: SessionContext,
    socket: TcpStream,
    config: ServerConfig,
    authorizer: Arc<dyn PublishAuthorizer>,
    registry: Arc<ChannelRegistry>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut conn = FlvConnection::new(socket);

    let request = match timeout(config.handshake_timeout, conn.read_request()).await {
        Ok(Ok(request)) => request,
        Ok(Err(e)) => {
            if let Error::InvalidRequest(ref reason) = e {
                if let Err(err) = conn.reject(reason).await {
                    tracing::trace!(session_id = ctx.session_id, error = %err, "Reject failed");
                }
            }
            return Err(e);
        }
        Err(_) => return Err(Error::Timeout),
    };

    let channel = registry.get_or_create(request.channel());

    match request {
        Request::Publish { channel: name, key } => {
            let ctx = ctx.with_request(name, SessionRole::Publisher);
            IngestSession::new(ctx, channel, conn, config)
                .with_authorizer(authorizer, key)
                .with_cancel(cancel)
                .run()
                .await
        }
        Request::Play { channel: name } => {
            let ctx = ctx.with_request(name, SessionRole::Viewer);
            ViewerSession::new(ctx, channel, conn, config)
                .with_cancel(cancel)
                .run()
                .await
        }
    }
}
