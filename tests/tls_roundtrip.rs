//! TLS client against a TLS server on the loopback interface.
#![cfg(feature = "tls")]

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use active_ddns::client::{Client, ClientConfigBuilder, ClientState};
use active_ddns::server::{Server, ServerConfigBuilder};
use active_ddns::transport::{client_config_with_roots, server_config};
use active_ddns::{AddressChangeSink, ErrorSink, LivenessError};
use async_trait::async_trait;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

struct Forward(mpsc::UnboundedSender<IpAddr>);

#[async_trait]
impl AddressChangeSink for Forward {
    async fn on_update(&self, addr: IpAddr) -> Result<(), LivenessError> {
        let _ = self.0.send(addr);
        Ok(())
    }
}

fn quiet() -> Arc<dyn ErrorSink> {
    Arc::new(|_: &LivenessError| {})
}

#[tokio::test]
async fn test_client_learns_address_over_tls() {
    let cert = rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string()]).unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der()));
    let server_tls = server_config(vec![cert.cert.der().clone()], key).unwrap();
    let client_tls = client_config_with_roots(vec![cert.cert.der().clone()]).unwrap();

    let config = ServerConfigBuilder::new()
        .listen_addr("127.0.0.1:0")
        .heartbeat_interval(Duration::from_millis(50))
        .build()
        .unwrap();
    let server = Server::bind_tls(config, server_tls, quiet()).await.unwrap();
    let addr = server.local_addr().unwrap();
    let server_shutdown = CancellationToken::new();
    let server_task = tokio::spawn(server.run(server_shutdown.clone()));

    let config = ClientConfigBuilder::new()
        .connect_addr(addr.to_string())
        .heartbeat_interval(Duration::from_millis(50))
        .redial_interval(Duration::from_millis(50), Duration::from_millis(200))
        .build()
        .unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = Client::tls(config, client_tls, quiet(), Arc::new(Forward(tx)))
        .await
        .unwrap();
    let mut state = client.subscribe();
    let client_shutdown = CancellationToken::new();
    let client_task = tokio::spawn(client.run(client_shutdown.clone()));

    let learned = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(learned, "127.0.0.1".parse::<IpAddr>().unwrap());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(*state.borrow_and_update(), ClientState::Connected);

    client_shutdown.cancel();
    timeout(WAIT, client_task).await.unwrap().unwrap();
    server_shutdown.cancel();
    timeout(WAIT, server_task).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_plain_client_never_learns_from_tls_server() {
    let cert = rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_string()]).unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der()));
    let server_tls = server_config(vec![cert.cert.der().clone()], key).unwrap();

    let config = ServerConfigBuilder::new()
        .listen_addr("127.0.0.1:0")
        .heartbeat_interval(Duration::from_millis(50))
        .build()
        .unwrap();
    let server = Server::bind_tls(config, server_tls, quiet()).await.unwrap();
    let addr = server.local_addr().unwrap();
    let server_shutdown = CancellationToken::new();
    let server_task = tokio::spawn(server.run(server_shutdown.clone()));

    // The server waits for a ClientHello that never comes, so no address
    // frame is ever sent.
    let config = ClientConfigBuilder::new()
        .connect_addr(addr.to_string())
        .heartbeat_interval(Duration::from_millis(50))
        .redial_interval(Duration::from_millis(50), Duration::from_millis(200))
        .build()
        .unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = Client::tcp(config, quiet(), Arc::new(Forward(tx)))
        .await
        .unwrap();
    let client_shutdown = CancellationToken::new();
    let client_task = tokio::spawn(client.run(client_shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(500)).await;
    client_shutdown.cancel();
    timeout(WAIT, client_task).await.unwrap().unwrap();
    assert!(rx.try_recv().is_err());

    server_shutdown.cancel();
    timeout(WAIT, server_task).await.unwrap().unwrap();
}
