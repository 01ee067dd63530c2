//! Transport plumbing for the liveness protocol.
//!
//! This module provides:
//!
//! - **Connections**: [`Connection`] pairs a byte stream with its peer address;
//!   [`Dialer`] and [`Acceptor`] produce them ([`TcpDialer`], [`TcpAcceptor`])
//! - **TLS**: [`TlsDialer`] and [`TlsAcceptor`] layer rustls over TCP
//!   (requires `tls` feature)
//! - **Deadlines**: [`DeadlineReader`] / [`DeadlineWriter`] re-arm the idle
//!   timeout around every individual read and write
//! - **Timing**: [`HeartbeatConfig`], [`idle_timeout`], and the stoppable
//!   [`LivenessTimer`]
//! - **Backoff**: [`BackoffController`] for the client's redial pacing
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │    Client dial loop / Server accept     │
//! ├─────────────────────────────────────────┤
//! │   Address handshake, heartbeat session  │
//! ├─────────────────────────────────────────┤
//! │   Deadline-armed halves, timer, backoff │  ← This module
//! ├─────────────────────────────────────────┤
//! │   TLS over TCP (or any reliable stream) │
//! └─────────────────────────────────────────┘
//! ```

mod backoff;
mod connection;
mod deadline;
mod timing;
#[cfg(feature = "tls")]
mod tls;

pub use backoff::BackoffController;
pub use connection::*;
pub use deadline::{DeadlineReader, DeadlineWriter};
pub use timing::{HeartbeatConfig, LivenessTimer, Ticks, idle_timeout};
#[cfg(feature = "tls")]
#[cfg_attr(docsrs, doc(cfg(feature = "tls")))]
pub use tls::{
    TlsAcceptor, TlsDialer, TlsError, certs_from_pem, client_config, client_config_with_roots,
    load_certs, load_private_key, server_config, server_config_from_pem, server_name,
};
