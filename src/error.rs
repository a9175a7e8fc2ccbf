//! Error types for tds-credential-proxy

use thiserror::Error;

use crate::protocol::sqlserver::TdsParseError;
use crate::tls::TlsError;

/// Main error type for the proxy
///
/// Every variant ends the connection pair it occurred on.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// I/O error (network, file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bad TDS packet length or a stream ending mid-packet
    #[error("Framing error: {0}")]
    Framing(String),

    /// PRELOGIN or LOGIN7 payload that cannot be decoded or re-encoded
    #[error("Codec error: {0}")]
    Codec(#[from] TdsParseError),

    /// Message arrived in a phase that does not allow it
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Upstream connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// TLS/SSL error
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),
}

/// Result type alias for ProxyError
pub type Result<T> = std::result::Result<T, ProxyError>;

impl From<serde_yaml::Error> for ProxyError {
    fn from(err: serde_yaml::Error) -> Self {
        ProxyError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_error_conversion() {
        let err: ProxyError = TdsParseError::MissingField("ENCRYPTION").into();
        assert!(matches!(err, ProxyError::Codec(_)));
        assert!(err.to_string().starts_with("Codec error:"));
    }

    #[test]
    fn test_yaml_error_is_config() {
        let yaml_err = serde_yaml::from_str::<u16>("not a number").unwrap_err();
        let err: ProxyError = yaml_err.into();
        assert!(matches!(err, ProxyError::Config(_)));
    }
}
