//! `CinderServer` builder and accept loop.
//!
//! This is the entry point for running a client-facing server role. It
//! ties the layers together: transport → registry → session loop →
//! dispatch table.

use std::net::SocketAddr;
use std::sync::Arc;

use cinder_session::ConnectionRegistry;
use cinder_transport::{TcpTransport, Transport};

use crate::handler::spawn_session;
use crate::{CinderError, DispatchTable, ServerConfig};

/// Builder for configuring and starting a Cinder server.
///
/// # Example
///
/// ```rust,ignore
/// use cinder::prelude::*;
///
/// let server = CinderServer::builder()
///     .bind("0.0.0.0:38101")
///     .build(table)
///     .await?;
/// server.run().await
/// ```
pub struct CinderServerBuilder {
    config: ServerConfig,
    registry: Option<Arc<ConnectionRegistry>>,
}

impl CinderServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            registry: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Uses an existing registry instead of creating one from the config.
    ///
    /// Handlers that broadcast or look up other sessions need the
    /// registry before the server exists; build it with
    /// [`ServerConfig::xor_key`] and share it here.
    pub fn registry(mut self, registry: Arc<ConnectionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Binds the listener. Nothing is accepted until
    /// [`CinderServer::run`].
    ///
    /// # Errors
    /// [`CinderError::Transport`] if the address cannot be bound.
    pub async fn build(self, dispatch: DispatchTable) -> Result<CinderServer, CinderError> {
        let transport = TcpTransport::bind(&self.config.bind_addr)
            .await?
            .with_max_frame_len(self.config.max_frame_len);

        let registry = match self.registry {
            Some(registry) => registry,
            None => Arc::new(ConnectionRegistry::new(
                self.config.registry.clone(),
                self.config.xor_key(),
            )),
        };

        tracing::info!(
            addr = %self.config.bind_addr,
            opcodes = dispatch.len(),
            capacity = registry.capacity(),
            "cinder server bound"
        );

        Ok(CinderServer {
            transport,
            registry,
            dispatch: Arc::new(dispatch),
        })
    }
}

impl Default for CinderServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound Cinder server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct CinderServer {
    transport: TcpTransport,
    registry: Arc<ConnectionRegistry>,
    dispatch: Arc<DispatchTable>,
}

impl CinderServer {
    /// Creates a new builder.
    pub fn builder() -> CinderServerBuilder {
        CinderServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// The registry every session of this server lives in.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Runs the accept loop until the process is terminated.
    ///
    /// Each accepted connection is registered and gets its own session
    /// task. A connection refused because the identity space is full, or
    /// a failed accept, is logged and the loop moves on.
    pub async fn run(mut self) -> Result<(), CinderError> {
        tracing::info!("cinder server running");

        loop {
            let conn = match self.transport.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                    continue;
                }
            };

            match self.registry.register(conn).await {
                Ok(session) => spawn_session(
                    session,
                    Arc::clone(&self.dispatch),
                    Arc::clone(&self.registry),
                ),
                Err(e) => tracing::warn!(error = %e, "connection refused"),
            }
        }
    }
}
