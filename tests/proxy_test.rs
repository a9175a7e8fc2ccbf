//! End-to-end tests: client -> proxy listener -> fake SQL Server
//!
//! Everything runs in-process over loopback TCP. The fake server performs a
//! real rustls handshake inside TDS packets, so these tests cover the full
//! login sequence, including the credential substitution.

mod common;

use std::io::Write;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use common::*;
use tds_credential_proxy::protocol::sqlserver::constants::packet_type;
use tds_credential_proxy::protocol::sqlserver::{EncryptionLevel, Message, MessageReader};
use tds_credential_proxy::tls::TlsVerifyMode;

#[tokio::test]
async fn test_login_is_rewritten_after_upstream_tls() {
    let pki = TestPki::generate();
    let (server_addr, server) = spawn_fake_server(&pki).await;
    let (proxy_addr, shutdown, listener) = spawn_proxy(proxy_for(server_addr)).await;

    let mut client = MessageReader::new(TcpStream::connect(proxy_addr).await.unwrap());

    // PRELOGIN: client asks for no encryption, server must see REQUIRED
    send(
        client.get_mut(),
        &prelogin_message(packet_type::PRELOGIN, 0x00),
    )
    .await;

    // Server answered ON, client must see NOT_SUPPORTED
    let response = read_message(&mut client).await.unwrap();
    assert_eq!(response.packet_type(), packet_type::TABULAR_RESULT);
    let state = encryption_of(&response);
    assert_eq!(state.level, EncryptionLevel::NotSupported);
    assert!(!state.client_cert);

    // LOGIN7 with throwaway credentials
    send(client.get_mut(), &login_message(&client_login())).await;
    let ack = read_message(&mut client).await.unwrap();
    assert_eq!(ack.payload(), &LOGIN_ACK[..]);

    // Post-login traffic relays both ways
    let batch = Message::new(packet_type::SQL_BATCH, b"s\0e\0l\0e\0c\0t\0 \01\0").unwrap();
    send(client.get_mut(), &batch).await;
    let echo = read_message(&mut client).await.unwrap();
    assert_eq!(echo.packet_type(), packet_type::TABULAR_RESULT);
    assert_eq!(echo.payload(), batch.payload());

    let seen = server.await.unwrap();
    let upstream_state = seen.prelogin_encryption.unwrap();
    assert_eq!(upstream_state.level, EncryptionLevel::Required);
    assert!(!upstream_state.client_cert);

    let login = seen.login.unwrap();
    assert_eq!(login.username, "real_user");
    assert_eq!(login.password, "real_pass");

    // Every other field survives the rewrite
    let mut expected = client_login();
    expected.set_credentials("real_user", "real_pass");
    assert_eq!(login, expected);
    assert_eq!(seen.batch.as_deref(), Some(batch.payload()));

    shutdown.send(()).unwrap();
    listener.await.unwrap();
}

#[tokio::test]
async fn test_verified_upstream_with_ca_bundle() {
    let pki = TestPki::generate();
    let mut ca_file = tempfile::NamedTempFile::new().unwrap();
    ca_file.write_all(pki.ca_pem.as_bytes()).unwrap();

    let (server_addr, server) = spawn_fake_server(&pki).await;
    let mut proxy = proxy_for(server_addr);
    proxy.tls.verify_mode = TlsVerifyMode::Verify;
    proxy.tls.ca_path = Some(ca_file.path().to_path_buf());
    proxy.tls.server_name = Some("localhost".into());
    let (proxy_addr, _shutdown, _listener) = spawn_proxy(proxy).await;

    let mut client = MessageReader::new(TcpStream::connect(proxy_addr).await.unwrap());
    send(
        client.get_mut(),
        &prelogin_message(packet_type::PRELOGIN, 0x01),
    )
    .await;
    read_message(&mut client).await.unwrap();

    send(client.get_mut(), &login_message(&client_login())).await;
    let ack = read_message(&mut client).await.unwrap();
    assert_eq!(ack.payload(), &LOGIN_ACK[..]);

    drop(client);
    let seen = server.await.unwrap();
    assert_eq!(seen.login.unwrap().username, "real_user");
    assert!(seen.batch.is_none());
}

#[tokio::test]
async fn test_malformed_prelogin_closes_client() {
    let pki = TestPki::generate();
    let (server_addr, server) = spawn_fake_server(&pki).await;
    let (proxy_addr, _shutdown, _listener) = spawn_proxy(proxy_for(server_addr)).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    // One option entry and no 0xFF terminator
    let bad = Message::new(packet_type::PRELOGIN, &[0x01, 0x00, 0x06, 0x00, 0x01]).unwrap();
    send(&mut client, &bad).await;

    let mut rest = Vec::new();
    let n = tokio::time::timeout(STEP_TIMEOUT, client.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);

    let seen = server.await.unwrap();
    assert!(seen.prelogin_encryption.is_none());
    assert!(seen.login.is_none());
}

#[tokio::test]
async fn test_zero_length_header_closes_client() {
    let pki = TestPki::generate();
    let (server_addr, server) = spawn_fake_server(&pki).await;
    let (proxy_addr, _shutdown, _listener) = spawn_proxy(proxy_for(server_addr)).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    tokio::io::AsyncWriteExt::write_all(
        &mut client,
        &[0x12, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00],
    )
    .await
    .unwrap();

    let mut rest = Vec::new();
    let n = tokio::time::timeout(STEP_TIMEOUT, client.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0);
    assert!(server.await.unwrap().prelogin_encryption.is_none());
}
