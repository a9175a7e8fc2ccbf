//! TLS Connector for the upstream leg
//!
//! This module provides `TlsConnector`, which runs the client side of the TLS
//! handshake with the SQL Server. The handshake is driven over a
//! [`TdsTlsStream`](crate::protocol::sqlserver::TdsTlsStream), so the
//! connector works on any `AsyncRead + AsyncWrite` stream.

use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;

use crate::tls::{load_certificates, TlsError, TlsVerifyMode, UpstreamTlsConfig};

/// TLS Connector for establishing TLS connections to servers
///
/// Wraps `tokio_rustls::TlsConnector` with configuration loading
/// and error handling.
///
/// # Example
///
/// ```ignore
/// let connector = TlsConnector::new(&proxy.tls)?;
/// let wrapped = TdsTlsStream::new(tcp_stream, packet_type::PRELOGIN);
/// let tls_stream = connector.connect_stream(wrapped, "sql.example.com").await?;
/// ```
#[derive(Clone)]
pub struct TlsConnector {
    inner: tokio_rustls::TlsConnector,
    verify_mode: TlsVerifyMode,
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("verify_mode", &self.verify_mode)
            .finish_non_exhaustive()
    }
}

impl TlsConnector {
    /// Create a new TLS connector from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - CA certificate file cannot be read or parsed
    /// - TLS configuration is invalid
    pub fn new(config: &UpstreamTlsConfig) -> Result<Self, TlsError> {
        config.validate().map_err(TlsError::config)?;

        if config.verify_mode == TlsVerifyMode::None {
            return Self::new_insecure();
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let root_store = build_root_store(config)?;
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::config(format!("Failed to set protocol versions: {}", e)))?;

        let client_config = match config.verify_mode {
            TlsVerifyMode::VerifyCa => {
                let webpki = WebPkiServerVerifier::builder_with_provider(Arc::new(root_store), provider)
                    .build()
                    .map_err(|e| TlsError::config(format!("Failed to build verifier: {}", e)))?;
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(SkipHostnameVerification {
                        inner: webpki,
                    }))
                    .with_no_client_auth()
            }
            _ => builder.with_root_certificates(root_store).with_no_client_auth(),
        };

        Ok(Self {
            inner: tokio_rustls::TlsConnector::from(Arc::new(client_config)),
            verify_mode: config.verify_mode,
        })
    }

    /// Create a TLS connector that skips certificate verification
    ///
    /// The connection is encrypted but the server is not authenticated.
    pub fn new_insecure() -> Result<Self, TlsError> {
        let provider = rustls::crypto::ring::default_provider();

        let client_config = ClientConfig::builder_with_provider(Arc::new(provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::config(format!("Failed to set protocol versions: {}", e)))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertificateVerification {}))
            .with_no_client_auth();

        Ok(Self {
            inner: tokio_rustls::TlsConnector::from(Arc::new(client_config)),
            verify_mode: TlsVerifyMode::None,
        })
    }

    pub fn verify_mode(&self) -> TlsVerifyMode {
        self.verify_mode
    }

    /// Run the client handshake over any async stream
    ///
    /// The `server_name` is used for SNI and, unless verification is
    /// disabled, certificate verification.
    pub async fn connect_stream<S>(
        &self,
        stream: S,
        server_name: &str,
    ) -> Result<TlsStream<S>, TlsError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let server_name = ServerName::try_from(server_name.to_string())
            .map_err(|_| TlsError::config(format!("Invalid server name: {}", server_name)))?;

        self.inner
            .connect(server_name, stream)
            .await
            .map_err(|e| TlsError::handshake(e.to_string()))
    }
}

/// Build the root certificate store based on configuration
fn build_root_store(config: &UpstreamTlsConfig) -> Result<RootCertStore, TlsError> {
    let mut root_store = RootCertStore::empty();

    if let Some(ca_path) = &config.ca_path {
        let certs = load_certificates(ca_path)?;
        if certs.is_empty() {
            return Err(TlsError::cert_load(ca_path, "no certificates found in file"));
        }
        for cert in certs {
            root_store
                .add(cert)
                .map_err(|e| TlsError::cert_load(ca_path, e.to_string()))?;
        }
    } else {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    Ok(root_store)
}

// Newer rustls releases report the mismatch as `NotValidForNameContext`
fn is_name_mismatch(error: &CertificateError) -> bool {
    matches!(error, CertificateError::NotValidForName)
        || format!("{:?}", error).starts_with("NotValidForName")
}

/// Chain verification without the hostname check
#[derive(Debug)]
struct SkipHostnameVerification {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for SkipHostnameVerification {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(rustls::Error::InvalidCertificate(ref e)) if is_name_mismatch(e) => {
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Custom certificate verifier that accepts any certificate
#[derive(Debug)]
struct NoCertificateVerification;

impl ServerCertVerifier for NoCertificateVerification {
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::sqlserver::constants::packet_type;
    use crate::protocol::sqlserver::TdsTlsStream;
    use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair};
    use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
    use std::io::Write;
    use std::path::PathBuf;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct TestPki {
        ca_pem: String,
        leaf_der: CertificateDer<'static>,
        leaf_key: Vec<u8>,
    }

    fn test_pki(host: &str) -> TestPki {
        let mut ca_params = CertificateParams::default();
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "Proxy Test CA");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca_key = KeyPair::generate().unwrap();
        let ca_cert = ca_params.self_signed(&ca_key).unwrap();

        let leaf_params = CertificateParams::new(vec![host.to_string()]).unwrap();
        let leaf_key = KeyPair::generate().unwrap();
        let leaf = leaf_params.signed_by(&leaf_key, &ca_cert, &ca_key).unwrap();

        TestPki {
            ca_pem: ca_cert.pem(),
            leaf_der: leaf.der().clone(),
            leaf_key: leaf_key.serialize_der(),
        }
    }

    fn acceptor(pki: &TestPki) -> tokio_rustls::TlsAcceptor {
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(pki.leaf_key.clone()));
        let config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(vec![pki.leaf_der.clone()], key)
        .unwrap();
        tokio_rustls::TlsAcceptor::from(Arc::new(config))
    }

    /// Handshake over an in-memory pipe with TDS wrapping on both sides
    async fn handshake(connector: &TlsConnector, pki: &TestPki, name: &str) -> Result<(), TlsError> {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let acceptor = acceptor(pki);

        let server = tokio::spawn(async move {
            let wrapped = TdsTlsStream::new(server_io, packet_type::TABULAR_RESULT);
            let mut tls = acceptor.accept(wrapped).await.ok()?;
            tls.get_mut().0.set_passthrough(true);
            let mut buf = [0u8; 4];
            tls.read_exact(&mut buf).await.ok()?;
            Some(buf)
        });

        let wrapped = TdsTlsStream::new(client_io, packet_type::PRELOGIN);
        let result = connector.connect_stream(wrapped, name).await;
        match result {
            Ok(mut tls) => {
                tls.get_mut().0.set_passthrough(true);
                tls.write_all(b"ping").await.unwrap();
                tls.flush().await.unwrap();
                assert_eq!(server.await.unwrap(), Some(*b"ping"));
                Ok(())
            }
            Err(e) => {
                server.abort();
                Err(e)
            }
        }
    }

    fn write_ca(pki: &TestPki) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(pki.ca_pem.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_connector_insecure() {
        let connector = TlsConnector::new_insecure().unwrap();
        assert_eq!(connector.verify_mode(), TlsVerifyMode::None);
    }

    #[test]
    fn test_connector_default_config_is_insecure() {
        let connector = TlsConnector::new(&UpstreamTlsConfig::default()).unwrap();
        assert_eq!(connector.verify_mode(), TlsVerifyMode::None);
    }

    #[test]
    fn test_connector_nonexistent_ca_file() {
        let config = UpstreamTlsConfig {
            verify_mode: TlsVerifyMode::Verify,
            ca_path: Some(PathBuf::from("/nonexistent/ca.crt")),
            server_name: None,
        };

        let err = TlsConnector::new(&config).unwrap_err().to_string();
        assert!(err.contains("certificate"));
    }

    #[test]
    fn test_connector_webpki_roots() {
        let config = UpstreamTlsConfig {
            verify_mode: TlsVerifyMode::Verify,
            ..Default::default()
        };
        assert!(TlsConnector::new(&config).is_ok());
    }

    #[tokio::test]
    async fn test_insecure_handshake_over_tds_wrapping() {
        let pki = test_pki("localhost");
        let connector = TlsConnector::new_insecure().unwrap();
        handshake(&connector, &pki, "anything.invalid").await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_mode_checks_chain_and_name() {
        let pki = test_pki("localhost");
        let ca = write_ca(&pki);
        let config = UpstreamTlsConfig {
            verify_mode: TlsVerifyMode::Verify,
            ca_path: Some(ca.path().to_path_buf()),
            server_name: None,
        };
        let connector = TlsConnector::new(&config).unwrap();

        handshake(&connector, &pki, "localhost").await.unwrap();
        let err = handshake(&connector, &pki, "other.example").await.unwrap_err();
        assert!(matches!(err, TlsError::Handshake(_)));
    }

    #[tokio::test]
    async fn test_verify_ca_ignores_name() {
        let pki = test_pki("localhost");
        let ca = write_ca(&pki);
        let config = UpstreamTlsConfig {
            verify_mode: TlsVerifyMode::VerifyCa,
            ca_path: Some(ca.path().to_path_buf()),
            server_name: None,
        };
        let connector = TlsConnector::new(&config).unwrap();
        handshake(&connector, &pki, "other.example").await.unwrap();
    }

    #[tokio::test]
    async fn test_verify_ca_rejects_unknown_issuer() {
        let trusted = test_pki("localhost");
        let presented = test_pki("localhost");
        let ca = write_ca(&trusted);
        let config = UpstreamTlsConfig {
            verify_mode: TlsVerifyMode::VerifyCa,
            ca_path: Some(ca.path().to_path_buf()),
            server_name: None,
        };
        let connector = TlsConnector::new(&config).unwrap();
        assert!(handshake(&connector, &presented, "localhost").await.is_err());
    }
}
