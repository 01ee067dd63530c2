//! # active-ddns
//!
//! Keeps a client informed of the public address its server-side connection
//! is seen from, over an always-on, heartbeat-monitored TLS or TCP stream.
//!
//! Per connection the server sends the observed client address once,
//! then both ends exchange one-byte heartbeats on a fixed interval. Silence
//! longer than the idle timeout closes the connection; the client redials
//! with bounded exponential backoff.
//!
//! ## Feature Flags
//!
//! - `client` (default): dial loop and address-change notification
//! - `server` (default): accept loop
//! - `tls` (default): rustls transport ([`transport::TlsDialer`],
//!   [`transport::TlsAcceptor`]) and PEM loading
//!
//! ## Modules
//!
//! - [`core`]: constants, error types and collaborator traits
//! - [`transport`]: connections, TLS, deadline-armed I/O, timers and backoff
//! - [`protocol`]: address handshake and heartbeat session
//! - [`hooks`]: log-backed error sink and shell-script address hook
//! - [`client`]: client dial loop (requires `client` feature)
//! - [`server`]: server accept loop (requires `server` feature)
//!
//! ## Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use active_ddns::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ClientConfigBuilder::new()
//!     .connect_addr("ddns.example.com:7000")
//!     .build()?;
//! let hook = ScriptHook::new("echo new address: {}")?;
//! let tls = active_ddns::transport::client_config(false)?;
//! let client = Client::tls(config, tls, Arc::new(TracingErrorSink::new()), Arc::new(hook)).await?;
//! client.run(CancellationToken::new()).await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod core;
pub mod hooks;
pub mod protocol;
pub mod transport;

// Client API (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

// Server API (feature-gated)
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;
    pub use crate::hooks::{ScriptHook, TracingErrorSink};
    pub use crate::transport::{
        Acceptor, Connection, Dialer, HeartbeatConfig, Pending, TcpAcceptor, TcpDialer,
    };

    #[cfg(feature = "tls")]
    pub use crate::transport::{TlsAcceptor, TlsDialer, TlsError};

    #[cfg(feature = "client")]
    pub use crate::client::{Client, ClientConfig, ClientConfigBuilder, ClientError, ClientState};

    #[cfg(feature = "server")]
    pub use crate::server::{Server, ServerConfig, ServerConfigBuilder, ServerError};
}

// Re-export commonly used items at crate root
pub use crate::core::{AddressChangeSink, ConfigError, ErrorSink, LivenessError};
