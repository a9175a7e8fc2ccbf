//! Connection-list parsing
//!
//! A connection list is a comma-separated set of proxy definitions:
//!
//! ```text
//! 0.0.0.0:1433=app_user:app_pass@sql1.internal:1433,0.0.0.0:1434=rpt:pw@sql2.internal:1433
//! ```
//!
//! Each entry is split on its first `=`, then the first `@`, then the first
//! `:` of the credentials. A password may therefore contain `:` but not `@`.

use super::types::{CredentialsConfig, ProxyDefinition};
use crate::error::{ProxyError, Result};

/// Format shown in parse errors
pub const EXPECTED_FORMAT: &str =
    "<bindAddress>:<bindPort>=<username>:<password>@<serverAddress>:<serverPort>";

/// Parse a full connection list
///
/// Blank entries (for example a trailing comma) are skipped.
pub fn parse_proxy_list(list: &str) -> Result<Vec<ProxyDefinition>> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(parse_proxy_definition)
        .collect()
}

/// Parse one `bind=user:pass@server` entry
pub fn parse_proxy_definition(entry: &str) -> Result<ProxyDefinition> {
    let invalid = || {
        ProxyError::Config(format!(
            "Invalid proxy specification: {}. Expected format: {}",
            entry, EXPECTED_FORMAT
        ))
    };

    let (bind, rest) = entry.split_once('=').ok_or_else(invalid)?;
    let (credentials, server) = rest.split_once('@').ok_or_else(invalid)?;
    let (username, password) = credentials.split_once(':').ok_or_else(invalid)?;

    let (bind_address, bind_port) = parse_endpoint(bind)?;
    let (server_host, server_port) = parse_endpoint(server)?;

    Ok(ProxyDefinition::new(
        bind_address,
        bind_port,
        CredentialsConfig::new(username, password),
        server_host,
        server_port,
    ))
}

/// Parse a `host:port` endpoint
pub fn parse_endpoint(endpoint: &str) -> Result<(String, u16)> {
    let invalid = || {
        ProxyError::Config(format!(
            "Invalid endpoint specification: {}. Expected format: {}",
            endpoint, EXPECTED_FORMAT
        ))
    };

    let (host, port) = endpoint.split_once(':').ok_or_else(invalid)?;
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}
