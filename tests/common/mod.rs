//! Shared fixtures for integration tests: a scripted fake SQL Server
//!
//! The fake server speaks just enough TDS to exercise the proxy: it answers
//! PRELOGIN, runs a TLS 1.2 handshake inside TABULAR_RESULT packets (like
//! SQL Server does), reads LOGIN7 over TLS and then echoes one batch.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use tds_credential_proxy::config::{CredentialsConfig, ProxyDefinition, ServerConfig};
use tds_credential_proxy::protocol::sqlserver::constants::{
    packet_type, prelogin_token, version,
};
use tds_credential_proxy::protocol::sqlserver::{
    write_message, EncryptionState, Login7, Message, MessageReader, OptionTable, TdsTlsStream,
};
use tds_credential_proxy::server::Listener;

/// Upper bound for any single test step
pub const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// DONE token reported as the login acknowledgement
pub const LOGIN_ACK: [u8; 9] = [0xFD, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

/// Test CA and a leaf certificate for `localhost`
pub struct TestPki {
    pub ca_pem: String,
    pub leaf_der: CertificateDer<'static>,
    pub leaf_key: Vec<u8>,
}

impl TestPki {
    pub fn generate() -> Self {
        let mut ca_params = CertificateParams::default();
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "Fake SQL Server CA");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca_key = KeyPair::generate().unwrap();
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let leaf_params = CertificateParams::new(vec!["localhost".to_string()]).unwrap();
        let leaf_key = KeyPair::generate().unwrap();
        let leaf = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).unwrap();

        Self {
            ca_pem: ca_cert.pem(),
            leaf_der: leaf.der().clone(),
            leaf_key: leaf_key.serialize_der(),
        }
    }

    /// Server-side acceptor restricted to TLS 1.2
    pub fn acceptor(&self) -> tokio_rustls::TlsAcceptor {
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.leaf_key.clone()));
        let config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_protocol_versions(&[&rustls::version::TLS12])
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![self.leaf_der.clone()], key)
        .unwrap();
        tokio_rustls::TlsAcceptor::from(Arc::new(config))
    }
}

/// What the fake server saw
#[derive(Debug, Default)]
pub struct ServerObservations {
    /// Encryption option of the client PRELOGIN as received
    pub prelogin_encryption: Option<EncryptionState>,
    /// LOGIN7 decoded from inside the TLS channel
    pub login: Option<Login7>,
    /// First batch received after login
    pub batch: Option<Vec<u8>>,
}

/// Start the scripted server on an ephemeral port
pub async fn spawn_fake_server(pki: &TestPki) -> (SocketAddr, JoinHandle<ServerObservations>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = pki.acceptor();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        run_fake_server(stream, acceptor).await
    });
    (addr, handle)
}

async fn run_fake_server(
    stream: TcpStream,
    acceptor: tokio_rustls::TlsAcceptor,
) -> ServerObservations {
    let mut seen = ServerObservations::default();
    let mut reader = MessageReader::new(stream);

    let Some(prelogin) = reader.next_message().await.unwrap() else {
        return seen;
    };
    assert_eq!(prelogin.packet_type(), packet_type::PRELOGIN);
    seen.prelogin_encryption = Some(encryption_of(&prelogin));

    write_message(reader.get_mut(), &prelogin_message(packet_type::TABULAR_RESULT, 0x01))
        .await
        .unwrap();

    let stream = reader.into_inner().unwrap();
    let wrapped = TdsTlsStream::new(stream, packet_type::TABULAR_RESULT);
    let mut tls = acceptor.accept(wrapped).await.unwrap();
    tls.get_mut().0.set_passthrough(true);

    let mut reader = MessageReader::new(tls);
    let login = reader.next_message().await.unwrap().unwrap();
    assert_eq!(login.packet_type(), packet_type::LOGIN7);
    seen.login = Some(Login7::decode(login.payload()).unwrap());

    let ack = Message::new(packet_type::TABULAR_RESULT, &LOGIN_ACK).unwrap();
    write_message(reader.get_mut(), &ack).await.unwrap();

    if let Some(batch) = reader.next_message().await.unwrap() {
        seen.batch = Some(batch.payload().to_vec());
        let echo = Message::new(packet_type::TABULAR_RESULT, batch.payload()).unwrap();
        write_message(reader.get_mut(), &echo).await.unwrap();
    }

    let _ = reader.get_mut().shutdown().await;
    seen
}

/// PRELOGIN with VERSION and ENCRYPTION options
pub fn prelogin_message(kind: u8, encryption: u8) -> Message {
    let payload = [
        0x00, 0x00, 0x0B, 0x00, 0x06, // VERSION at 11, len 6
        0x01, 0x00, 0x11, 0x00, 0x01, // ENCRYPTION at 17, len 1
        0xFF, //
        0x10, 0x00, 0x07, 0xD0, 0x00, 0x00, encryption,
    ];
    Message::new(kind, &payload).unwrap()
}

pub fn encryption_of(message: &Message) -> EncryptionState {
    let table = OptionTable::parse(message.payload()).unwrap();
    let data = table
        .option_data(message.payload(), prelogin_token::ENCRYPTION)
        .unwrap()
        .unwrap();
    EncryptionState::from_byte(data[0])
}

/// LOGIN7 as a driver with throwaway credentials would send it
pub fn client_login() -> Login7 {
    Login7 {
        tds_version: version::TDS_7_4,
        packet_size: 4096,
        client_prog_version: [0x00, 0x00, 0x00, 0x07],
        client_pid: 31337,
        option_flags1: 0xE0,
        option_flags2: 0x03,
        client_lcid: 0x0409,
        hostname: "workstation".into(),
        username: "guest".into(),
        password: "x".into(),
        app_name: "integration-test".into(),
        server_name: "localhost".into(),
        library_name: "ODBC".into(),
        language: "us_english".into(),
        database: "master".into(),
        client_id: [0x00, 0x50, 0x8B, 0xE3, 0xB7, 0x8F],
        ..Default::default()
    }
}

pub fn login_message(login: &Login7) -> Message {
    Message::new(packet_type::LOGIN7, &login.encode().unwrap()).unwrap()
}

/// Start a listener for one proxy definition on an ephemeral port
pub async fn spawn_proxy(
    proxy: ProxyDefinition,
) -> (SocketAddr, broadcast::Sender<()>, JoinHandle<()>) {
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let server = ServerConfig {
        connect_timeout_secs: 5,
        tls_handshake_timeout_secs: 5,
        ..ServerConfig::default()
    };
    let listener = Listener::bind(proxy, server, shutdown_rx).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        listener.run().await.unwrap();
    });
    (addr, shutdown_tx, handle)
}

/// Proxy in front of `upstream` that logs in as `real_user`/`real_pass`
pub fn proxy_for(upstream: SocketAddr) -> ProxyDefinition {
    ProxyDefinition::new(
        "127.0.0.1",
        0,
        CredentialsConfig::new("real_user", "real_pass"),
        upstream.ip().to_string(),
        upstream.port(),
    )
}

/// Read one message, failing the test if the proxy stalls
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut MessageReader<R>) -> Option<Message> {
    tokio::time::timeout(STEP_TIMEOUT, reader.next_message())
        .await
        .expect("timed out waiting for a message")
        .unwrap()
}

pub async fn send<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) {
    write_message(writer, message).await.unwrap();
}
