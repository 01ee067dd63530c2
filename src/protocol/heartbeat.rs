//! Heartbeat session shared by both roles.
//!
//! Once the handshake is done, each side runs one sender loop (a tag-0 frame
//! per timer tick) and one receiver loop (any frame resets the idle deadline).
//! Either loop failing closes the connection, which ends the other.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::core::constants::HEARTBEAT_TAG;
use crate::core::{ErrorSink, LivenessError};
use crate::transport::{DeadlineReader, DeadlineWriter, LivenessTimer, Ticks};

/// Which end of the connection a session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Dialing side; learns its address.
    Client,
    /// Accepting side; reports the observed address.
    Server,
}

impl Role {
    /// Name of the other end, used as the log field for the peer.
    pub fn peer_label(self) -> &'static str {
        match self {
            Role::Client => "server",
            Role::Server => "client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => f.write_str("client"),
            Role::Server => f.write_str("server"),
        }
    }
}

/// One frame of the heartbeat phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatFrame {
    /// Tag 0: keepalive.
    Heartbeat,
    /// Tag N > 0: N bytes of payload to skip.
    Skip(u8),
}

impl HeartbeatFrame {
    /// Parse a tag byte. Every byte value is a valid frame start.
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            HEARTBEAT_TAG => Self::Heartbeat,
            len => Self::Skip(len),
        }
    }

    /// Tag byte on the wire.
    pub fn tag(self) -> u8 {
        match self {
            Self::Heartbeat => HEARTBEAT_TAG,
            Self::Skip(len) => len,
        }
    }
}

/// What happened during a finished session.
#[derive(Debug, Default)]
pub struct SessionSummary {
    /// Heartbeats written by the sender loop.
    pub heartbeats_sent: u64,
    /// Heartbeats read by the receiver loop.
    pub heartbeats_received: u64,
    /// Non-heartbeat frames skipped by the receiver loop.
    pub frames_skipped: u64,
    /// Error that ended the receiver loop. `None` when the session was
    /// closed by shutdown or by a sender failure (already reported).
    pub error: Option<LivenessError>,
}

#[derive(Debug, Default)]
struct ReceiveStats {
    heartbeats: u64,
    skipped: u64,
}

/// Heartbeat exchange on an established connection.
pub struct HeartbeatSession<R, W> {
    reader: DeadlineReader<R>,
    writer: DeadlineWriter<W>,
    timer: LivenessTimer,
    role: Role,
    peer: SocketAddr,
    errors: Arc<dyn ErrorSink>,
}

impl<R, W> HeartbeatSession<R, W>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    /// Create a session sending a heartbeat every `interval`.
    pub fn new(
        reader: DeadlineReader<R>,
        writer: DeadlineWriter<W>,
        interval: Duration,
        role: Role,
        peer: SocketAddr,
        errors: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            reader,
            writer,
            timer: LivenessTimer::new(interval),
            role,
            peer,
            errors,
        }
    }

    /// Handle to the sender's timer. Stopping it ends the sender loop only.
    pub fn timer(&self) -> LivenessTimer {
        self.timer.clone()
    }

    /// Run until either loop fails or `shutdown` fires.
    ///
    /// On return the timer is stopped and both halves of the connection have
    /// been dropped, closing it.
    pub async fn run(self, shutdown: &CancellationToken) -> SessionSummary {
        let Self {
            mut reader,
            writer,
            timer,
            role,
            peer,
            errors,
        } = self;
        let span = info_span!("heartbeat", %role, %peer);
        let closed = shutdown.child_token();

        let sender = tokio::spawn(
            send_loop(writer, timer.ticks(), closed.clone(), Arc::clone(&errors))
                .instrument(span.clone()),
        );

        let mut stats = ReceiveStats::default();
        let error = async {
            tokio::select! {
                biased;
                _ = closed.cancelled() => None,
                err = receive_loop(&mut reader, &mut stats) => Some(err),
            }
        }
        .instrument(span)
        .await;

        closed.cancel();
        timer.stop();
        drop(reader);

        let heartbeats_sent = sender.await.unwrap_or_else(|err| {
            warn!(%role, %peer, "heartbeat sender failed: {err}");
            0
        });
        if let Some(err) = &error {
            errors.report(err);
        }

        SessionSummary {
            heartbeats_sent,
            heartbeats_received: stats.heartbeats,
            frames_skipped: stats.skipped,
            error,
        }
    }
}

async fn send_loop<W>(
    mut writer: DeadlineWriter<W>,
    mut ticks: Ticks,
    closed: CancellationToken,
    errors: Arc<dyn ErrorSink>,
) -> u64
where
    W: AsyncWrite + Unpin,
{
    debug!("Heartbeat started");
    let frame = [HeartbeatFrame::Heartbeat.tag()];
    let mut sent = 0;
    loop {
        let tick = tokio::select! {
            biased;
            _ = closed.cancelled() => None,
            tick = ticks.next() => tick,
        };
        if tick.is_none() {
            break;
        }

        let result = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            result = writer.write_all(&frame) => result,
        };
        match result {
            Ok(()) => {
                sent += 1;
                debug!("Sent heartbeat");
            }
            Err(err) => {
                errors.report(&err);
                closed.cancel();
                break;
            }
        }
    }
    debug!("Heartbeat stopped");
    sent
}

async fn receive_loop<R>(reader: &mut DeadlineReader<R>, stats: &mut ReceiveStats) -> LivenessError
where
    R: AsyncRead + Unpin,
{
    loop {
        let tag = match reader.read_u8().await {
            Ok(tag) => tag,
            Err(err) => return err,
        };
        match HeartbeatFrame::from_tag(tag) {
            HeartbeatFrame::Heartbeat => {
                stats.heartbeats += 1;
                debug!("Received heartbeat");
            }
            HeartbeatFrame::Skip(len) => {
                // No resync: a corrupted length desynchronizes the stream.
                if let Err(err) = reader.discard(len).await {
                    return err;
                }
                stats.skipped += 1;
                warn!(length = len, "Received invalid data");
            }
        }
    }
}
