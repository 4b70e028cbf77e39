//! Server Module
//!
//! Owns the listening socket, the shared statistics registry and the handler,
//! and spawns one [`Connection`](crate::connection::Connection) task per
//! accepted client.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Server                              │
//! │                                                             │
//! │   TcpListener ── accept() ──┬──> Connection task (client 1) │
//! │                             ├──> Connection task (client 2) │
//! │                             └──> ...                        │
//! │                                                             │
//! │   Arc<dyn RequestHandler>  ─ shared by every connection     │
//! │   Arc<StatsRegistry>       ─ shared by every connection     │
//! │   CancellationToken        ─ parent of every connection's   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failed `accept` stops the server and is returned to the caller. When
//! serving stops for any reason the server-wide token is cancelled, so
//! connections waiting for their next command close too. A handler call that
//! is already running is not interrupted.
//!
//! ## Example
//!
//! ```ignore
//! use mcwire::server::Server;
//! use mcwire::storage::MemoryStore;
//! use mcwire::ServerConfig;
//! use std::sync::Arc;
//!
//! let server = Server::new(ServerConfig::with_addr(":11211"), Arc::new(MemoryStore::new()));
//! server.listen_and_serve().await?;
//! ```

use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::handler::RequestHandler;
use crate::stats::StatsRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{lookup_host, TcpListener};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Errors that stop the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configured address could not be resolved
    #[error("invalid listen address {addr:?}: {source}")]
    InvalidAddress {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The address resolved but binding failed
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Accepting a connection failed
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),
}

/// A memcached text-protocol server.
pub struct Server {
    config: Arc<ServerConfig>,
    handler: Arc<dyn RequestHandler>,
    stats: Arc<StatsRegistry>,
    cancel: CancellationToken,
}

impl Server {
    /// Creates a server with a fresh statistics registry.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime (the registry's counters
    /// start their tasks immediately).
    pub fn new(config: ServerConfig, handler: Arc<dyn RequestHandler>) -> Self {
        let stats = StatsRegistry::builder()
            .queue_capacity(config.counter_queue_capacity)
            .build();
        Self::with_stats(config, handler, Arc::new(stats))
    }

    /// Creates a server reporting into an existing registry, for example one
    /// built with custom metrics.
    pub fn with_stats(
        config: ServerConfig,
        handler: Arc<dyn RequestHandler>,
        stats: Arc<StatsRegistry>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            handler,
            stats,
            cancel: CancellationToken::new(),
        }
    }

    /// The registry shared by every connection.
    pub fn stats(&self) -> &Arc<StatsRegistry> {
        &self.stats
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The server-wide token. Cancelling it is the same as [`shutdown`](Self::shutdown).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops accepting and closes idle connections.
    pub fn shutdown(&self) {
        info!("Server shutdown requested");
        self.cancel.cancel();
    }

    /// Binds the configured address and serves until shutdown or a failed
    /// accept.
    pub async fn listen_and_serve(&self) -> Result<(), ServerError> {
        let listener = bind(&self.config.bind_address()).await?;
        self.serve(listener).await
    }

    /// Serves connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        if let Some(stats_handler) = self.handler.as_stats_handler() {
            stats_handler.stats(Arc::clone(&self.stats));
        }

        match listener.local_addr() {
            Ok(addr) => info!(
                addr = %addr,
                capabilities = %self.handler.capabilities(),
                "Listening for connections"
            ),
            Err(e) => debug!(error = %e, "Listener has no local address"),
        }

        let result = self.accept_loop(&listener).await;

        // Connections derive their tokens from ours
        self.cancel.cancel();
        info!("Server stopped");
        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<(), ServerError> {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => accepted,
            };

            let (stream, addr) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    return Err(ServerError::Accept(e));
                }
            };

            if let Err(e) = stream.set_nodelay(true) {
                debug!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
            }

            tokio::spawn(handle_connection(
                stream,
                addr,
                Arc::clone(&self.handler),
                Arc::clone(&self.stats),
                Arc::clone(&self.config),
                self.cancel.child_token(),
            ));
        }
    }
}

/// Resolves `addr` and binds the first address it yields.
async fn bind(addr: &str) -> Result<TcpListener, ServerError> {
    let resolved: SocketAddr = match addr.parse() {
        Ok(resolved) => resolved,
        Err(_) => lookup_host(addr)
            .await
            .map_err(|source| ServerError::InvalidAddress {
                addr: addr.to_string(),
                source,
            })?
            .next()
            .ok_or_else(|| ServerError::InvalidAddress {
                addr: addr.to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no addresses resolved",
                ),
            })?,
    };

    TcpListener::bind(resolved)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Creates a server with the default configuration on `addr` and serves
/// until a failed accept.
pub async fn listen_and_serve(
    addr: impl Into<String>,
    handler: Arc<dyn RequestHandler>,
) -> Result<(), ServerError> {
    Server::new(ServerConfig::with_addr(addr), handler)
        .listen_and_serve()
        .await
}
