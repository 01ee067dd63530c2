//! Server lifecycle: accept loop and per-connection handlers.

#[allow(clippy::module_inception)]
mod server;
mod session;

pub use server::*;
pub use session::serve_connection;
