//! Client dial loop.
//!
//! `Idle → Dialing → Connected → Idle` on a live connection,
//! `Dialing → Backoff → Dialing` on a failed dial. The loop only leaves
//! these states when the shutdown token fires.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::notify::AddressNotifier;
use crate::core::constants::{DEFAULT_REDIAL_MAX, DEFAULT_REDIAL_MIN};
use crate::core::{AddressChangeSink, ConfigError, ErrorSink, LivenessError};
use crate::protocol::{HeartbeatSession, Role, recv_address};
use crate::transport::{BackoffController, Connection, Dialer, HeartbeatConfig, TcpDialer};
#[cfg(feature = "tls")]
use crate::transport::{TlsDialer, TlsError};

/// Errors that stop the client before its loop starts.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server address could not be resolved.
    #[error("cannot resolve {addr}: {source}")]
    Resolve {
        /// Address as configured.
        addr: String,
        /// Resolver error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The TLS layer could not be set up for the configured address.
    #[cfg(feature = "tls")]
    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Server address to connect to (`host:port`).
    pub connect_addr: String,

    /// Heartbeat settings; must match the server's for a sensible timeout.
    pub heartbeat: HeartbeatConfig,

    /// Shortest pause between reconnection attempts.
    pub redial_min: Duration,

    /// Longest pause between reconnection attempts.
    pub redial_max: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_addr: String::new(),
            heartbeat: HeartbeatConfig::default(),
            redial_min: DEFAULT_REDIAL_MIN,
            redial_max: DEFAULT_REDIAL_MAX,
        }
    }
}

impl ClientConfig {
    /// Check the configuration for values the loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_addr.is_empty() {
            return Err(ConfigError::EmptyAddress);
        }
        self.heartbeat.validate()?;
        if self.redial_min > self.redial_max {
            return Err(ConfigError::InvalidRedialRange {
                min: self.redial_min,
                max: self.redial_max,
            });
        }
        Ok(())
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the server address.
    pub fn connect_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.connect_addr = addr.into();
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

    /// Set the redial backoff bounds.
    pub fn redial_interval(mut self, min: Duration, max: Duration) -> Self {
        self.config.redial_min = min;
        self.config.redial_max = max;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Where the dial loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Between connections.
    Idle,
    /// Dial in progress.
    Dialing,
    /// Handshake or heartbeat session running.
    Connected,
    /// Waiting before the next dial.
    Backoff,
    /// Loop exited after shutdown.
    Stopped,
}

/// Always-on client: dials, learns its address, keeps the connection alive,
/// and redials with bounded exponential backoff when it dies.
pub struct Client<D> {
    config: ClientConfig,
    dialer: D,
    errors: Arc<dyn ErrorSink>,
    on_update: Arc<dyn AddressChangeSink>,
    state: watch::Sender<ClientState>,
}

/// Resolve the configured address; each connection attempt gets the idle
/// timeout as its deadline.
async fn resolve(config: &ClientConfig) -> Result<TcpDialer, ClientError> {
    config.validate()?;
    let dialer = TcpDialer::resolve(&config.connect_addr)
        .await
        .map_err(|source| ClientError::Resolve {
            addr: config.connect_addr.clone(),
            source,
        })?;
    Ok(dialer.with_timeout(config.heartbeat.idle_timeout()))
}

impl Client<TcpDialer> {
    /// Resolve the configured TCP address and build a client for it.
    ///
    /// Resolution failure is the only fatal client error.
    pub async fn tcp(
        config: ClientConfig,
        errors: Arc<dyn ErrorSink>,
        on_update: Arc<dyn AddressChangeSink>,
    ) -> Result<Self, ClientError> {
        let dialer = resolve(&config).await?;
        Self::new(config, dialer, errors, on_update)
    }
}

#[cfg(feature = "tls")]
impl Client<TlsDialer> {
    /// Resolve the configured address and build a client that speaks TLS
    /// with `tls`.
    ///
    /// The server certificate must match the host part of the address.
    pub async fn tls(
        config: ClientConfig,
        tls: Arc<rustls::ClientConfig>,
        errors: Arc<dyn ErrorSink>,
        on_update: Arc<dyn AddressChangeSink>,
    ) -> Result<Self, ClientError> {
        let dialer = TlsDialer::new(resolve(&config).await?, tls)?;
        Self::new(config, dialer, errors, on_update)
    }
}

impl<D: Dialer> Client<D> {
    /// Build a client over an arbitrary transport.
    pub fn new(
        config: ClientConfig,
        dialer: D,
        errors: Arc<dyn ErrorSink>,
        on_update: Arc<dyn AddressChangeSink>,
    ) -> Result<Self, ClientError> {
        config.validate()?;
        let (state, _) = watch::channel(ClientState::Idle);
        Ok(Self {
            config,
            dialer,
            errors,
            on_update,
            state,
        })
    }

    /// Watch the loop's state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    /// Get the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run the dial loop until `shutdown` fires.
    ///
    /// Queued address notifications are delivered before this returns.
    pub async fn run(self, shutdown: CancellationToken) {
        let notifier = AddressNotifier::spawn(Arc::clone(&self.on_update));
        let mut backoff = BackoffController::new(self.config.redial_min, self.config.redial_max);

        while !shutdown.is_cancelled() {
            self.state.send_replace(ClientState::Dialing);
            let dialed = tokio::select! {
                _ = shutdown.cancelled() => break,
                dialed = self.dialer.dial() => dialed,
            };

            match dialed {
                Ok(conn) => {
                    backoff.minimize();
                    self.state.send_replace(ClientState::Connected);
                    self.serve(conn, &notifier, &shutdown).await;
                    self.state.send_replace(ClientState::Idle);
                }
                Err(err) => {
                    self.errors.report(&err);
                    self.state.send_replace(ClientState::Backoff);
                    let delay = backoff.value();
                    backoff.double();
                    info!(duration = ?delay, "Waiting for reconnection");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.state.send_replace(ClientState::Stopped);
        notifier.close().await;
    }

    async fn serve(
        &self,
        conn: Connection<D::Stream>,
        notifier: &AddressNotifier,
        shutdown: &CancellationToken,
    ) {
        let server: SocketAddr = conn.peer_addr();
        info!(%server, "Connected");
        let (mut reader, writer) = conn.split(self.config.heartbeat.idle_timeout());

        let received = tokio::select! {
            _ = shutdown.cancelled() => None,
            received = recv_address(&mut reader) => Some(received),
        };
        match received {
            Some(Ok(addr)) => {
                debug!(%server, address = %addr, "Received IP address");
                notifier.notify(addr);
                let session = HeartbeatSession::new(
                    reader,
                    writer,
                    self.config.heartbeat.interval,
                    Role::Client,
                    server,
                    Arc::clone(&self.errors),
                );
                session.run(shutdown).await;
            }
            Some(Err(LivenessError::InvalidAddressLength(length))) => {
                warn!(%server, length, "Received invalid data");
            }
            Some(Err(err)) => self.errors.report(&err),
            None => {}
        }
        info!(%server, "Disconnected");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::net::IpAddr;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio::time::Instant;

    use super::*;

    enum Step {
        Refuse,
        Serve(Vec<u8>),
    }

    /// Dialer that replays a script, then refuses forever.
    struct ScriptedDialer {
        steps: Mutex<VecDeque<Step>>,
        dials: Mutex<Vec<Instant>>,
    }

    impl ScriptedDialer {
        fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into_iter().collect()),
                dials: Mutex::new(Vec::new()),
            })
        }

        fn gaps(&self) -> Vec<Duration> {
            let dials = self.dials.lock();
            dials.windows(2).map(|w| w[1] - w[0]).collect()
        }
    }

    #[async_trait]
    impl Dialer for Arc<ScriptedDialer> {
        type Stream = DuplexStream;

        async fn dial(&self) -> Result<Connection<DuplexStream>, LivenessError> {
            self.dials.lock().push(Instant::now());
            let step = self.steps.lock().pop_front();
            match step {
                Some(Step::Serve(bytes)) => {
                    let (mut remote, local) = tokio::io::duplex(64);
                    remote.write_all(&bytes).await?;
                    drop(remote);
                    Ok(Connection::new(local, "192.0.2.1:7000".parse().unwrap()))
                }
                Some(Step::Refuse) | None => Err(LivenessError::Dial {
                    addr: self.target().to_string(),
                    source: io::ErrorKind::ConnectionRefused.into(),
                }),
            }
        }

        fn target(&self) -> &str {
            "scripted:7000"
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<IpAddr>>,
    }

    #[async_trait]
    impl AddressChangeSink for Recorder {
        async fn on_update(&self, addr: IpAddr) -> Result<(), LivenessError> {
            self.seen.lock().push(addr);
            Ok(())
        }
    }

    fn config() -> ClientConfig {
        ClientConfigBuilder::new()
            .connect_addr("scripted:7000")
            .build()
            .unwrap()
    }

    async fn run_for(
        dialer: Arc<ScriptedDialer>,
        recorder: Arc<Recorder>,
        duration: Duration,
    ) -> Arc<Mutex<Vec<String>>> {
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink_reported = Arc::clone(&reported);
        let errors: Arc<dyn ErrorSink> =
            Arc::new(move |err: &LivenessError| sink_reported.lock().push(err.to_string()));
        let client = Client::new(config(), dialer, errors, recorder).unwrap();
        let mut state = client.subscribe();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(client.run(shutdown.clone()));
        tokio::time::sleep(duration).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(*state.borrow_and_update(), ClientState::Stopped);
        reported
    }

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().copied().map(Duration::from_secs).collect()
    }

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.heartbeat.interval, Duration::from_millis(5000));
        assert_eq!(config.heartbeat.missed_allowed, 3);
        assert_eq!(config.redial_min, Duration::from_millis(1000));
        assert_eq!(config.redial_max, Duration::from_millis(15000));
        assert_eq!(config.validate(), Err(ConfigError::EmptyAddress));
    }

    #[test]
    fn test_builder() {
        let config = ClientConfigBuilder::new()
            .connect_addr("ddns.example.com:7000")
            .heartbeat_interval(Duration::from_secs(2))
            .missed_heartbeats(1)
            .redial_interval(Duration::from_millis(500), Duration::from_secs(30))
            .build()
            .unwrap();
        assert_eq!(config.connect_addr, "ddns.example.com:7000");
        assert_eq!(config.heartbeat.idle_timeout(), Duration::from_secs(5));
        assert_eq!(config.redial_min, Duration::from_millis(500));
    }

    #[test]
    fn test_builder_rejects_inverted_redial() {
        let err = ClientConfigBuilder::new()
            .connect_addr("127.0.0.1:7000")
            .redial_interval(Duration::from_secs(20), Duration::from_secs(10))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRedialRange { .. }));
    }

    #[test]
    fn test_builder_rejects_zero_interval() {
        let err = ClientConfigBuilder::new()
            .connect_addr("127.0.0.1:7000")
            .heartbeat_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::ZeroHeartbeatInterval);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_between_failed_dials() {
        let dialer = ScriptedDialer::new([]);
        let recorder = Arc::new(Recorder::default());

        // Dials at 0, 1, 3, 7, 15; the next one would be at 30.
        let reported = run_for(Arc::clone(&dialer), recorder, Duration::from_secs(20)).await;

        assert_eq!(dialer.gaps(), secs(&[1, 2, 4, 8]));
        assert_eq!(reported.lock().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_dial_resets_backoff() {
        let frame = hex::decode("040a000005").unwrap();
        let dialer = ScriptedDialer::new([Step::Refuse, Step::Refuse, Step::Serve(frame)]);
        let recorder = Arc::new(Recorder::default());

        run_for(Arc::clone(&dialer), recorder, Duration::from_secs(5)).await;

        // The served connection ends at once; the redial is immediate and
        // the following failure waits `min` again.
        assert_eq!(dialer.gaps(), secs(&[1, 2, 0, 1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_address_change_fires_once_per_value() {
        let dialer = ScriptedDialer::new([
            Step::Serve(hex::decode("040a000005").unwrap()),
            Step::Serve(hex::decode("040a000005").unwrap()),
            Step::Serve(hex::decode("040a000006").unwrap()),
        ]);
        let recorder = Arc::new(Recorder::default());

        run_for(dialer, Arc::clone(&recorder), Duration::from_secs(2)).await;

        let expected: Vec<IpAddr> = vec!["10.0.0.5".parse().unwrap(), "10.0.0.6".parse().unwrap()];
        assert_eq!(*recorder.seen.lock(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_address_length_skips_notification() {
        let dialer = ScriptedDialer::new([Step::Serve(vec![5, 1, 2, 3, 4, 5])]);
        let recorder = Arc::new(Recorder::default());

        let reported = run_for(
            Arc::clone(&dialer),
            Arc::clone(&recorder),
            Duration::from_millis(500),
        )
        .await;

        assert!(recorder.seen.lock().is_empty());
        // Only the refused redial is reported; the violation is logged.
        assert_eq!(reported.lock().len(), 1);
        assert_eq!(dialer.gaps(), secs(&[0]));
    }

    fn errors() -> Arc<dyn ErrorSink> {
        Arc::new(|_: &LivenessError| {})
    }

    #[tokio::test]
    async fn test_tcp_dial_deadline_is_idle_timeout() {
        let config = ClientConfigBuilder::new()
            .connect_addr("127.0.0.1:7000")
            .heartbeat_interval(Duration::from_secs(2))
            .missed_heartbeats(1)
            .build()
            .unwrap();
        let client = Client::tcp(config, errors(), Arc::new(Recorder::default()))
            .await
            .unwrap();
        assert_eq!(client.dialer.timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unresolvable_address_is_fatal() {
        let config = ClientConfigBuilder::new()
            .connect_addr("no port here")
            .build()
            .unwrap();
        let err = Client::tcp(config, errors(), Arc::new(Recorder::default()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Resolve { .. }));
    }

    #[cfg(feature = "tls")]
    #[tokio::test]
    async fn test_tls_client_targets_configured_host() {
        let config = ClientConfigBuilder::new()
            .connect_addr("127.0.0.1:7000")
            .build()
            .unwrap();
        let tls = crate::transport::client_config(true).unwrap();
        let client = Client::tls(config, tls, errors(), Arc::new(Recorder::default()))
            .await
            .unwrap();
        assert_eq!(client.dialer.target(), "127.0.0.1:7000");
    }
}
