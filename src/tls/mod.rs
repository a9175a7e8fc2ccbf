//! TLS support for the upstream leg
//!
//! SQL Server negotiates TLS inside TDS: the handshake records travel as the
//! payload of PRELOGIN packets, and only after it completes does TLS run
//! over the raw socket. The proxy plays the TLS client against the server.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐    plaintext TDS   ┌───────────┐   TDS-wrapped TLS  ┌──────────┐
//! │  Client  │ ────────────────── │   Proxy   │ ────────────────── │   SQL    │
//! │          │                    │           │    (client-side)   │  Server  │
//! └──────────┘                    └───────────┘                    └──────────┘
//! ```
//!
//! # Security
//!
//! - Uses rustls with the ring crypto provider
//! - TLS 1.2 minimum, TLS 1.3 preferred
//! - Verification is configurable per proxy; SQL Server ships self-signed
//!   certificates, so the default is encryption without verification

mod config;
mod connector;
mod error;

pub use config::{TlsVerifyMode, UpstreamTlsConfig};
pub use connector::TlsConnector;
pub use error::TlsError;

use rustls::pki_types::CertificateDer;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Load certificates from a PEM file
///
/// Reads all certificates from a PEM-encoded file and returns them as
/// a vector of `CertificateDer`. This supports certificate bundles.
pub(crate) fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let file = File::open(path).map_err(|e| TlsError::cert_load(path, e.to_string()))?;

    let mut reader = BufReader::new(file);

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::cert_load(path, e.to_string()))?;

    Ok(certs)
}
