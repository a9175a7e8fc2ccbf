//! Configuration types

use serde::Deserialize;
use zeroize::Zeroize;

use crate::tls::UpstreamTlsConfig;

/// Root configuration structure
///
/// # Example
///
/// ```yaml
/// server:
///   connect_timeout_secs: 10
///   max_connections: 200
///
/// proxies:
///   - bind_address: "0.0.0.0"
///     bind_port: 1433
///     server_host: "sql.internal"
///     server_port: 1433
///     credentials:
///       username: "app_user"
///       password: "${SQL_APP_PASSWORD}"
///
/// logging:
///   level: "info"
/// ```
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Connection handling settings shared by all proxies
    #[serde(default)]
    pub server: ServerConfig,

    /// One listener per entry
    #[serde(default)]
    pub proxies: Vec<ProxyDefinition>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.proxies.is_empty() {
            return Err(
                "no proxies configured (set MSSQLPROXY_PROXIES or the proxies section)".to_string(),
            );
        }

        for proxy in &self.proxies {
            proxy
                .validate()
                .map_err(|e| format!("proxy {}: {}", proxy, e))?;
        }

        let mut binds: Vec<(&str, u16)> = self
            .proxies
            .iter()
            .map(|p| (p.bind_address.as_str(), p.bind_port))
            .collect();
        binds.sort_unstable();
        if let Some(pair) = binds.windows(2).find(|w| w[0] == w[1] && w[0].1 != 0) {
            return Err(format!("duplicate bind address {}:{}", pair[0].0, pair[0].1));
        }

        if self.server.tls_handshake_timeout_secs == 0 {
            return Err("tls_handshake_timeout_secs must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// One proxy: a local listener and the upstream server it fronts
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct ProxyDefinition {
    /// Address to listen on
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Port to listen on
    pub bind_port: u16,
    /// Upstream SQL Server host
    pub server_host: String,
    /// Upstream SQL Server port
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    /// Credentials substituted into every LOGIN7
    pub credentials: CredentialsConfig,
    /// Upstream TLS settings
    #[serde(default)]
    pub tls: UpstreamTlsConfig,
}

impl ProxyDefinition {
    pub fn new(
        bind_address: impl Into<String>,
        bind_port: u16,
        credentials: CredentialsConfig,
        server_host: impl Into<String>,
        server_port: u16,
    ) -> Self {
        Self {
            bind_address: bind_address.into(),
            bind_port,
            server_host: server_host.into(),
            server_port,
            credentials,
            tls: UpstreamTlsConfig::default(),
        }
    }

    /// `host:port` to bind the listener to
    pub fn bind_endpoint(&self) -> String {
        format!("{}:{}", self.bind_address, self.bind_port)
    }

    /// `host:port` of the upstream server
    pub fn server_endpoint(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// Name used for TLS SNI and verification
    pub fn tls_server_name(&self) -> &str {
        self.tls.effective_server_name(&self.server_host)
    }

    fn validate(&self) -> Result<(), String> {
        if self.bind_address.is_empty() {
            return Err("bind_address must not be empty".to_string());
        }
        if self.server_host.is_empty() {
            return Err("server_host must not be empty".to_string());
        }
        if self.server_port == 0 {
            return Err("server_port must not be 0".to_string());
        }
        if self.credentials.username.is_empty() {
            return Err("credentials.username must not be empty".to_string());
        }
        self.tls.validate()
    }
}

impl std::fmt::Display for ProxyDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}={}@{}",
            self.bind_endpoint(),
            self.credentials,
            self.server_endpoint()
        )
    }
}

impl std::fmt::Debug for ProxyDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyDefinition")
            .field("bind_address", &self.bind_address)
            .field("bind_port", &self.bind_port)
            .field("server_host", &self.server_host)
            .field("server_port", &self.server_port)
            .field("credentials", &self.credentials)
            .field("tls", &self.tls)
            .finish()
    }
}

/// Credentials to inject during authentication
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct CredentialsConfig {
    /// Username to use when connecting to target
    pub username: String,
    /// Password to use when connecting to target
    pub password: String,
}

impl CredentialsConfig {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Password with every character replaced by `*`
    pub fn masked_password(&self) -> String {
        "*".repeat(self.password.chars().count())
    }
}

impl Drop for CredentialsConfig {
    fn drop(&mut self) {
        self.password.zeroize();
    }
}

impl std::fmt::Display for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.username, self.masked_password())
    }
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("username", &self.username)
            .field("password", &self.masked_password())
            .finish()
    }
}

/// Connection handling settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Upstream TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Upstream TLS handshake timeout in seconds
    #[serde(default = "default_tls_handshake_timeout")]
    pub tls_handshake_timeout_secs: u64,
    /// Client idle timeout in seconds once relaying (0 = disabled)
    #[serde(default)]
    pub idle_timeout_secs: u64,
    /// Maximum number of concurrent connections per listener (0 = unlimited)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            tls_handshake_timeout_secs: default_tls_handshake_timeout(),
            idle_timeout_secs: 0,
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    1433
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_tls_handshake_timeout() -> u64 {
    15
}

fn default_max_connections() -> usize {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}
