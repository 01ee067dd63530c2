//! TLS over TCP.
//!
//! [`TlsDialer`] and [`TlsAcceptor`] wrap the plain TCP transports. The
//! client handshake runs inside [`Dialer::dial`]; the server handshake runs
//! on the connection's own task through [`Pending::establish`].

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::warn;

use super::connection::{Acceptor, Connection, Dialer, Pending, TcpAcceptor, TcpDialer};
use crate::core::LivenessError;

/// Errors raised while building a TLS configuration.
#[derive(Debug, Error)]
pub enum TlsError {
    /// A certificate or key file could not be read.
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// The certificate file holds no PEM certificate.
    #[error("no certificate found in {}", .0.display())]
    NoCertificates(PathBuf),

    /// The key file holds no PEM private key.
    #[error("no private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),

    /// The system trust store is empty.
    #[error("no trusted root certificates available")]
    NoRoots,

    /// The host part of the target is not a valid TLS server name.
    #[error("invalid server name in {0}")]
    ServerName(String),

    /// rustls rejected the configuration.
    #[error("tls configuration error: {0}")]
    Rustls(#[from] rustls::Error),
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// Read every PEM certificate from `reader`.
pub fn certs_from_pem(reader: &mut dyn BufRead) -> io::Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(reader).collect()
}

/// Load a PEM certificate chain from `path`.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = certs_from_pem(&mut open(path)?).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

/// Load the first PEM private key from `path`.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

/// Server configuration presenting `certs` signed by `key`.
pub fn server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    let config = rustls::ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

/// Server configuration from a PEM certificate chain and private key.
pub fn server_config_from_pem(
    cert: &Path,
    key: &Path,
) -> Result<Arc<rustls::ServerConfig>, TlsError> {
    server_config(load_certs(cert)?, load_private_key(key)?)
}

/// Client configuration trusting only `roots`.
pub fn client_config_with_roots(
    roots: Vec<CertificateDer<'static>>,
) -> Result<Arc<rustls::ClientConfig>, TlsError> {
    let mut store = RootCertStore::empty();
    for cert in roots {
        store.add(cert)?;
    }
    let config = rustls::ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(store)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Client configuration trusting the system roots.
///
/// With `insecure` the server certificate is not verified at all; handshake
/// signatures are still checked.
pub fn client_config(insecure: bool) -> Result<Arc<rustls::ClientConfig>, TlsError> {
    if insecure {
        let provider = provider();
        let config = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider)))
            .with_no_client_auth();
        return Ok(Arc::new(config));
    }

    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        warn!("cannot load system certificate: {err}");
    }
    let mut store = RootCertStore::empty();
    store.add_parsable_certificates(native.certs);
    if store.is_empty() {
        return Err(TlsError::NoRoots);
    }
    let config = rustls::ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(store)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// Verifier that accepts any server certificate.
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// TLS server name for a `host:port` target.
pub fn server_name(target: &str) -> Result<ServerName<'static>, TlsError> {
    let host = target.rsplit_once(':').map_or(target, |(host, _)| host);
    let host = host.trim_start_matches('[').trim_end_matches(']');
    ServerName::try_from(host)
        .map(|name| name.to_owned())
        .map_err(|_| TlsError::ServerName(target.to_string()))
}

/// Dials TCP, then runs the TLS client handshake.
pub struct TlsDialer {
    tcp: TcpDialer,
    connector: tokio_rustls::TlsConnector,
    server_name: ServerName<'static>,
}

impl TlsDialer {
    /// Wrap `tcp`; the server must present a certificate for its host.
    pub fn new(tcp: TcpDialer, config: Arc<rustls::ClientConfig>) -> Result<Self, TlsError> {
        let server_name = server_name(tcp.target())?;
        Ok(Self {
            tcp,
            connector: tokio_rustls::TlsConnector::from(config),
            server_name,
        })
    }
}

#[async_trait]
impl Dialer for TlsDialer {
    type Stream = tokio_rustls::client::TlsStream<TcpStream>;

    async fn dial(&self) -> Result<Connection<Self::Stream>, LivenessError> {
        let conn = self.tcp.dial().await?;
        let peer = conn.peer_addr();
        let handshake = self
            .connector
            .connect(self.server_name.clone(), conn.into_inner());
        Pending::new(peer, handshake)
            .establish(self.tcp.timeout())
            .await
    }

    fn target(&self) -> &str {
        self.tcp.target()
    }
}

/// Accepts TCP and hands out connections that still owe a TLS handshake.
pub struct TlsAcceptor {
    tcp: TcpAcceptor,
    acceptor: tokio_rustls::TlsAcceptor,
}

impl TlsAcceptor {
    /// Bind to the given address.
    pub async fn bind(addr: &str, config: Arc<rustls::ServerConfig>) -> Result<Self, LivenessError> {
        Ok(Self::new(TcpAcceptor::bind(addr).await?, config))
    }

    /// Wrap an already bound TCP acceptor.
    pub fn new(tcp: TcpAcceptor, config: Arc<rustls::ServerConfig>) -> Self {
        Self {
            tcp,
            acceptor: tokio_rustls::TlsAcceptor::from(config),
        }
    }
}

#[async_trait]
impl Acceptor for TlsAcceptor {
    type Stream = tokio_rustls::server::TlsStream<TcpStream>;

    async fn accept(&mut self) -> Result<Pending<Self::Stream>, LivenessError> {
        let (stream, peer) = self.tcp.accept_tcp().await?;
        Ok(Pending::new(peer, self.acceptor.accept(stream)))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rcgen::{CertifiedKey, generate_simple_self_signed};
    use rustls::pki_types::PrivatePkcs8KeyDer;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn self_signed() -> CertifiedKey {
        generate_simple_self_signed(vec!["127.0.0.1".to_string(), "localhost".to_string()])
            .unwrap()
    }

    fn server_for(cert: &CertifiedKey) -> Arc<rustls::ServerConfig> {
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der()));
        server_config(vec![cert.cert.der().clone()], key).unwrap()
    }

    async fn loopback(
        server: Arc<rustls::ServerConfig>,
        client: Arc<rustls::ClientConfig>,
    ) -> (
        Result<Connection<tokio_rustls::client::TlsStream<TcpStream>>, LivenessError>,
        Result<Connection<tokio_rustls::server::TlsStream<TcpStream>>, LivenessError>,
    ) {
        let mut acceptor = TlsAcceptor::bind("127.0.0.1:0", server).await.unwrap();
        let addr = acceptor.local_addr().unwrap();
        let tcp = TcpDialer::resolve(&addr.to_string())
            .await
            .unwrap()
            .with_timeout(TIMEOUT);
        let dialer = TlsDialer::new(tcp, client).unwrap();

        let accepted = async {
            let pending = acceptor.accept().await?;
            pending.establish(TIMEOUT).await
        };
        tokio::join!(dialer.dial(), accepted)
    }

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("active-ddns-{}-{name}", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn test_loopback_handshake() {
        let cert = self_signed();
        let client = client_config_with_roots(vec![cert.cert.der().clone()]).unwrap();

        let (dialed, accepted) = loopback(server_for(&cert), client).await;
        let mut dialed = dialed.unwrap().into_inner();
        let accepted = accepted.unwrap();
        assert_eq!(accepted.peer_addr().ip().to_string(), "127.0.0.1");

        let mut accepted = accepted.into_inner();
        accepted.write_all(&[0x04, 127, 0, 0, 1]).await.unwrap();
        accepted.flush().await.unwrap();

        let mut frame = [0u8; 5];
        dialed.read_exact(&mut frame).await.unwrap();
        assert_eq!(hex::encode(frame), "047f000001");
    }

    #[tokio::test]
    async fn test_untrusted_certificate_rejected() {
        let cert = self_signed();
        let other = self_signed();
        let client = client_config_with_roots(vec![other.cert.der().clone()]).unwrap();

        let (dialed, accepted) = loopback(server_for(&cert), client).await;
        let err = dialed.unwrap_err();
        assert!(err.is_establishment());
        assert!(matches!(err, LivenessError::Handshake { .. }));
        assert!(accepted.is_err());
    }

    #[tokio::test]
    async fn test_insecure_client_accepts_self_signed() {
        let cert = self_signed();
        let client = client_config(true).unwrap();

        let (dialed, accepted) = loopback(server_for(&cert), client).await;
        assert!(dialed.is_ok());
        assert!(accepted.is_ok());
    }

    #[tokio::test]
    async fn test_plain_tcp_client_fails_handshake() {
        let cert = self_signed();
        let mut acceptor = TlsAcceptor::bind("127.0.0.1:0", server_for(&cert))
            .await
            .unwrap();
        let addr = acceptor.local_addr().unwrap();

        let mut plain = TcpStream::connect(addr).await.unwrap();
        let pending = acceptor.accept().await.unwrap();
        plain.write_all(&[0u8; 64]).await.unwrap();

        let err = pending.establish(TIMEOUT).await.unwrap_err();
        assert!(matches!(err, LivenessError::Handshake { .. }));
    }

    #[test]
    fn test_load_pem_files() {
        let cert = self_signed();
        let cert_path = temp_file("cert.pem", &cert.cert.pem());
        let key_path = temp_file("key.pem", &cert.key_pair.serialize_pem());

        assert_eq!(load_certs(&cert_path).unwrap().len(), 1);
        assert!(load_private_key(&key_path).is_ok());
        assert!(server_config_from_pem(&cert_path, &key_path).is_ok());

        // Each file lacks what the other one holds.
        assert!(matches!(load_certs(&key_path), Err(TlsError::NoCertificates(_))));
        assert!(matches!(load_private_key(&cert_path), Err(TlsError::NoPrivateKey(_))));

        std::fs::remove_file(cert_path).unwrap();
        std::fs::remove_file(key_path).unwrap();
    }

    #[test]
    fn test_missing_file() {
        let err = load_certs(Path::new("/nonexistent/cert.pem")).unwrap_err();
        assert!(matches!(err, TlsError::Read { .. }));
        assert!(err.to_string().starts_with("cannot read /nonexistent/cert.pem"));
    }

    #[test]
    fn test_server_name() {
        assert!(matches!(
            server_name("127.0.0.1:7000").unwrap(),
            ServerName::IpAddress(_)
        ));
        assert!(matches!(server_name("[::1]:7000").unwrap(), ServerName::IpAddress(_)));
        assert!(matches!(
            server_name("ddns.example.com:7000").unwrap(),
            ServerName::DnsName(_)
        ));
        assert!(matches!(
            server_name("not a host!:7000"),
            Err(TlsError::ServerName(_))
        ));
    }
}
