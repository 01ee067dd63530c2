//! Per-connection handler: transport setup, address handshake, then heartbeats.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::{ErrorSink, LivenessError};
use crate::protocol::{HeartbeatSession, Role, SessionSummary, send_address};
use crate::transport::{ByteStream, HeartbeatConfig, Pending};

/// Serve one accepted connection until it dies or `shutdown` fires.
///
/// Transport setup (the TLS handshake) must finish within the idle timeout.
/// Returns `Err` when setup or the address handshake failed; the error has
/// already been reported to `errors`.
pub async fn serve_connection<S: ByteStream>(
    pending: Pending<S>,
    heartbeat: HeartbeatConfig,
    errors: Arc<dyn ErrorSink>,
    shutdown: CancellationToken,
) -> Result<SessionSummary, LivenessError> {
    let client = pending.peer_addr();
    info!(%client, "Connected");

    let established = tokio::select! {
        _ = shutdown.cancelled() => None,
        established = pending.establish(heartbeat.idle_timeout()) => Some(established),
    };
    let conn = match established {
        Some(Ok(conn)) => conn,
        Some(Err(err)) => {
            errors.report(&err);
            info!(%client, "Disconnected");
            return Err(err);
        }
        None => {
            info!(%client, "Disconnected");
            return Ok(SessionSummary::default());
        }
    };
    let (reader, mut writer) = conn.split(heartbeat.idle_timeout());

    let sent = tokio::select! {
        _ = shutdown.cancelled() => None,
        sent = send_address(&mut writer, client.ip()) => Some(sent),
    };
    let result = match sent {
        Some(Ok(frame)) => {
            debug!(%client, address = %frame.addr(), "Sent IP address");
            let session = HeartbeatSession::new(
                reader,
                writer,
                heartbeat.interval,
                Role::Server,
                client,
                Arc::clone(&errors),
            );
            Ok(session.run(&shutdown).await)
        }
        Some(Err(err)) => {
            errors.report(&err);
            Err(err)
        }
        None => Ok(SessionSummary::default()),
    };
    info!(%client, "Disconnected");
    result
}
