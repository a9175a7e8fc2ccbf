//! tds-credential-proxy - SQL Server (TDS) proxy with credential substitution
//!
//! This library provides the core functionality for a proxy that:
//! - Accepts plaintext TDS clients and tells them encryption is unavailable
//! - Forces TLS on the upstream connection by requiring encryption in PRELOGIN
//! - Holds the client's LOGIN7 until the upstream TLS handshake completes
//! - Replaces the login's username and password with configured credentials
//! - Relays all traffic transparently after authentication

#[macro_use]
mod logging;

pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod tls;

pub use config::{Config, CredentialsConfig, ProxyDefinition};
pub use error::{ProxyError, Result};
pub use server::{Listener, ListenerStats};
pub use tls::{TlsConnector, TlsError, TlsVerifyMode, UpstreamTlsConfig};
