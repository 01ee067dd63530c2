//! Server accept loop.
//!
//! Every accepted connection gets its own task; a failing connection never
//! affects the loop or its siblings.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::session::serve_connection;
use crate::core::{ConfigError, ErrorSink, LivenessError};
#[cfg(feature = "tls")]
use crate::transport::TlsAcceptor;
use crate::transport::{Acceptor, HeartbeatConfig, TcpAcceptor};

/// Errors that stop the server before its loop starts.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the listener.
    #[error(transparent)]
    Bind(#[from] LivenessError),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Server configuration.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to listen on (`host:port`).
    pub listen_addr: String,

    /// Heartbeat settings.
    pub heartbeat: HeartbeatConfig,
}

impl ServerConfig {
    /// Check the configuration for values the loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.is_empty() {
            return Err(ConfigError::EmptyAddress);
        }
        self.heartbeat.validate()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the listen address.
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the heartbeat interval.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat.interval = interval;
        self
    }

    /// Set the number of missed heartbeats tolerated.
    pub fn missed_heartbeats(mut self, missed: u32) -> Self {
        self.config.heartbeat.missed_allowed = missed;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Accepts clients and tells each one the address it connected from.
pub struct Server<A> {
    heartbeat: HeartbeatConfig,
    acceptor: A,
    errors: Arc<dyn ErrorSink>,
}

impl Server<TcpAcceptor> {
    /// Bind a TCP listener on the configured address.
    pub async fn bind(config: ServerConfig, errors: Arc<dyn ErrorSink>) -> Result<Self, ServerError> {
        config.validate()?;
        let acceptor = TcpAcceptor::bind(&config.listen_addr).await?;
        Ok(Self::new(config.heartbeat, acceptor, errors))
    }
}

#[cfg(feature = "tls")]
impl Server<TlsAcceptor> {
    /// Bind a TLS listener on the configured address.
    pub async fn bind_tls(
        config: ServerConfig,
        tls: Arc<rustls::ServerConfig>,
        errors: Arc<dyn ErrorSink>,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let acceptor = TlsAcceptor::bind(&config.listen_addr, tls).await?;
        Ok(Self::new(config.heartbeat, acceptor, errors))
    }
}

impl<A: Acceptor> Server<A> {
    /// Build a server over an arbitrary transport.
    ///
    /// `acceptor.accept()` must be cancel safe.
    pub fn new(heartbeat: HeartbeatConfig, acceptor: A, errors: Arc<dyn ErrorSink>) -> Self {
        Self {
            heartbeat,
            acceptor,
            errors,
        }
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.acceptor.local_addr()
    }

    /// Run the accept loop until `shutdown` fires, then wait for every live
    /// connection to close.
    pub async fn run(mut self, shutdown: CancellationToken) {
        match self.local_addr() {
            Ok(addr) => info!(%addr, "Listening"),
            Err(err) => warn!("cannot read local address: {err}"),
        }

        let mut handlers = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(err) = joined {
                        warn!("connection handler failed: {err}");
                    }
                }
                accepted = self.acceptor.accept() => match accepted {
                    Ok(pending) => {
                        handlers.spawn(serve_connection(
                            pending,
                            self.heartbeat,
                            Arc::clone(&self.errors),
                            shutdown.clone(),
                        ));
                    }
                    // Accept failures are transient; keep listening.
                    Err(err) => self.errors.report(&err),
                },
            }
        }

        while let Some(joined) = handlers.join_next().await {
            if let Err(err) = joined {
                warn!("connection handler failed: {err}");
            }
        }
    }
}
