//! Connections and the transports that produce them.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream, lookup_host};

use super::deadline::{DeadlineReader, DeadlineWriter};
use super::timing::HeartbeatConfig;
use crate::core::LivenessError;

/// Ordered, reliable, bidirectional byte stream.
///
/// Blanket-implemented for anything tokio can read from and write to, so a
/// TLS stream plugs in the same way as a plain [`TcpStream`].
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// A byte stream together with the identity of its remote peer.
///
/// Owned by exactly one lifecycle for one session. The stream is closed when
/// both halves returned by [`Connection::split`] are dropped.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    peer: SocketAddr,
}

impl<S: ByteStream> Connection<S> {
    /// Wrap a stream whose remote end is `peer`.
    pub fn new(stream: S, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }

    /// Remote address as observed on this side of the connection.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Split into a read half and a write half, each arming `idle_timeout`
    /// before every operation.
    pub fn split(
        self,
        idle_timeout: Duration,
    ) -> (DeadlineReader<ReadHalf<S>>, DeadlineWriter<WriteHalf<S>>) {
        let (read, write) = tokio::io::split(self.stream);
        (
            DeadlineReader::new(read, idle_timeout),
            DeadlineWriter::new(write, idle_timeout),
        )
    }

    /// Take the stream back out.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

/// Produces outgoing connections for the client.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Stream type of the produced connections.
    type Stream: ByteStream;

    /// Open a new connection to the server.
    async fn dial(&self) -> Result<Connection<Self::Stream>, LivenessError>;

    /// Human-readable target, used in logs.
    fn target(&self) -> &str;
}

/// Accepted connection whose transport setup has not run yet.
///
/// Setup (a TLS handshake, for instance) runs on the connection's own task
/// through [`establish`](Self::establish), so a slow client never holds up
/// the accept loop.
pub struct Pending<S> {
    peer: SocketAddr,
    setup: Pin<Box<dyn Future<Output = io::Result<S>> + Send>>,
}

impl<S: ByteStream> Pending<S> {
    /// A connection that needs no setup.
    pub fn ready(conn: Connection<S>) -> Self {
        let Connection { stream, peer } = conn;
        Self::new(peer, std::future::ready(Ok(stream)))
    }

    /// A connection from `peer` that becomes usable once `setup` resolves.
    pub fn new<F>(peer: SocketAddr, setup: F) -> Self
    where
        F: Future<Output = io::Result<S>> + Send + 'static,
    {
        Self {
            peer,
            setup: Box::pin(setup),
        }
    }

    /// Remote address as observed on this side of the connection.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Run the setup under `timeout`.
    pub async fn establish(self, timeout: Duration) -> Result<Connection<S>, LivenessError> {
        let peer = self.peer;
        let handshake_err = |source| LivenessError::Handshake {
            peer: peer.to_string(),
            source,
        };
        let stream = tokio::time::timeout(timeout, self.setup)
            .await
            .map_err(|_| handshake_err(timed_out("handshake", timeout)))?
            .map_err(handshake_err)?;
        Ok(Connection::new(stream, peer))
    }
}

impl<S> fmt::Debug for Pending<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending").field("peer", &self.peer).finish_non_exhaustive()
    }
}

/// Produces incoming connections for the server.
#[async_trait]
pub trait Acceptor: Send {
    /// Stream type of the produced connections.
    type Stream: ByteStream;

    /// Wait for the next client. Must be cancel safe.
    async fn accept(&mut self) -> Result<Pending<Self::Stream>, LivenessError>;

    /// Address the acceptor is bound to.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

fn timed_out(op: &str, timeout: Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("{op} timed out after {timeout:?}"),
    )
}

/// Plain TCP dialer.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    target: String,
    timeout: Duration,
}

impl TcpDialer {
    /// Create a dialer after checking that `target` resolves.
    ///
    /// Every later [`dial`](Dialer::dial) resolves the name again, so DNS
    /// changes are picked up between reconnections.
    pub async fn resolve(target: &str) -> io::Result<Self> {
        let mut addrs = lookup_host(target).await?;
        if addrs.next().is_none() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{target}: no addresses found"),
            ));
        }
        Ok(Self {
            target: target.to_string(),
            timeout: HeartbeatConfig::default().idle_timeout(),
        })
    }

    /// Give up on a connection attempt after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Deadline for one connection attempt.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn dial_error(&self, source: io::Error) -> LivenessError {
        LivenessError::Dial {
            addr: self.target.clone(),
            source,
        }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    type Stream = TcpStream;

    async fn dial(&self) -> Result<Connection<TcpStream>, LivenessError> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(self.target.as_str()))
            .await
            .map_err(|_| self.dial_error(timed_out("connect", self.timeout)))?
            .map_err(|err| self.dial_error(err))?;
        let peer = stream.peer_addr().map_err(|err| self.dial_error(err))?;
        Ok(Connection::new(stream, peer))
    }

    fn target(&self) -> &str {
        &self.target
    }
}

/// Plain TCP acceptor.
#[derive(Debug)]
pub struct TcpAcceptor {
    listener: TcpListener,
}

impl TcpAcceptor {
    /// Bind to the given address.
    pub async fn bind(addr: &str) -> Result<Self, LivenessError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| LivenessError::Listen {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self { listener })
    }

    /// Wrap an already bound listener.
    pub fn from_listener(listener: TcpListener) -> Self {
        Self { listener }
    }

    /// Accept the next TCP connection.
    pub(crate) async fn accept_tcp(&mut self) -> Result<(TcpStream, SocketAddr), LivenessError> {
        self.listener.accept().await.map_err(LivenessError::Accept)
    }
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    type Stream = TcpStream;

    async fn accept(&mut self) -> Result<Pending<TcpStream>, LivenessError> {
        let (stream, peer) = self.accept_tcp().await?;
        Ok(Pending::ready(Connection::new(stream, peer)))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}
