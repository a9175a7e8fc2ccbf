//! Upstream TLS configuration
//!
//! The client leg of the proxy is always plaintext, so only the proxy-to-server
//! side is configurable.

use serde::Deserialize;
use std::path::PathBuf;

/// TLS settings for one upstream server
///
/// # Example YAML
/// ```yaml
/// proxies:
///   - bind_port: 1433
///     server_host: "sql.internal"
///     server_port: 1433
///     tls:
///       verify_mode: "verify"
///       ca_path: "/etc/ssl/sql-ca.pem"
///       server_name: "sql.internal.example.com"
/// ```
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct UpstreamTlsConfig {
    /// Certificate verification mode
    ///
    /// Defaults to `none`: SQL Server generates a self-signed certificate
    /// unless an administrator installs one.
    #[serde(default)]
    pub verify_mode: TlsVerifyMode,

    /// Path to CA certificate bundle in PEM format
    ///
    /// If not specified, the webpki root set is used.
    pub ca_path: Option<PathBuf>,

    /// Name sent as SNI and checked against the certificate
    ///
    /// Falls back to the server host.
    pub server_name: Option<String>,
}

/// Certificate verification mode for the upstream connection
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TlsVerifyMode {
    /// Full verification: CA chain + hostname match
    Verify,

    /// Verify CA chain only, skip hostname check
    ///
    /// Useful when connecting via IP address to a server whose certificate
    /// carries a DNS name.
    #[serde(rename = "verify_ca")]
    VerifyCa,

    /// No verification
    ///
    /// The channel is still encrypted, but the server is not authenticated.
    #[default]
    None,
}

impl std::fmt::Display for TlsVerifyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TlsVerifyMode::Verify => "verify",
            TlsVerifyMode::VerifyCa => "verify_ca",
            TlsVerifyMode::None => "none",
        };
        f.write_str(name)
    }
}

impl UpstreamTlsConfig {
    /// Validate the upstream TLS configuration
    pub fn validate(&self) -> Result<(), String> {
        if matches!(&self.server_name, Some(name) if name.trim().is_empty()) {
            return Err("tls.server_name must not be empty".to_string());
        }
        if self.verify_mode == TlsVerifyMode::None && self.ca_path.is_some() {
            return Err("tls.ca_path is set but verify_mode is none".to_string());
        }
        Ok(())
    }

    /// SNI / verification name for a given upstream host
    pub fn effective_server_name<'a>(&'a self, server_host: &'a str) -> &'a str {
        self.server_name.as_deref().unwrap_or(server_host)
    }
}
