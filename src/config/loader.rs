//! Configuration loader

use super::{parse_proxy_list, Config};
use crate::error::{ProxyError, Result};
use std::path::Path;

/// Build the runtime configuration
///
/// Reads the YAML file when one is given, appends the proxies from the
/// connection list, applies `MSSQLPROXY_*` env overrides and validates.
pub fn load_config(path: Option<&Path>, proxy_list: Option<&str>) -> Result<Config> {
    let config = match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                ProxyError::Config(format!("cannot read {}: {}", path.display(), e))
            })?;
            serde_yaml::from_str(&contents)?
        }
        None => Config::default(),
    };
    finish(config, proxy_list)
}

/// Load configuration from a YAML string (useful for testing)
pub fn load_config_from_str(yaml: &str, proxy_list: Option<&str>) -> Result<Config> {
    let config: Config = serde_yaml::from_str(yaml)?;
    finish(config, proxy_list)
}

fn finish(mut config: Config, proxy_list: Option<&str>) -> Result<Config> {
    resolve_config_env_vars(&mut config);
    if let Some(list) = proxy_list {
        config.proxies.extend(parse_proxy_list(list)?);
    }
    apply_env_overrides(&mut config);
    config.validate().map_err(ProxyError::Config)?;
    Ok(config)
}

/// Apply `MSSQLPROXY_*` environment variable overrides to a config.
///
/// Supported env vars:
/// - `MSSQLPROXY_CONNECT_TIMEOUT_SECS`
/// - `MSSQLPROXY_TLS_HANDSHAKE_TIMEOUT_SECS`
/// - `MSSQLPROXY_IDLE_TIMEOUT_SECS`
/// - `MSSQLPROXY_MAX_CONNECTIONS`
/// - `MSSQLPROXY_LOG_LEVEL`
///
/// Values that fail to parse are ignored with a warning.
pub fn apply_env_overrides(config: &mut Config) {
    override_parsed(
        "MSSQLPROXY_CONNECT_TIMEOUT_SECS",
        &mut config.server.connect_timeout_secs,
    );
    override_parsed(
        "MSSQLPROXY_TLS_HANDSHAKE_TIMEOUT_SECS",
        &mut config.server.tls_handshake_timeout_secs,
    );
    override_parsed(
        "MSSQLPROXY_IDLE_TIMEOUT_SECS",
        &mut config.server.idle_timeout_secs,
    );
    override_parsed(
        "MSSQLPROXY_MAX_CONNECTIONS",
        &mut config.server.max_connections,
    );
    if let Ok(val) = std::env::var("MSSQLPROXY_LOG_LEVEL") {
        debug!("Overriding log level from MSSQLPROXY_LOG_LEVEL");
        config.logging.level = val;
    }
}

fn override_parsed<T: std::str::FromStr>(var: &str, target: &mut T) {
    let Ok(val) = std::env::var(var) else {
        return;
    };
    match val.trim().parse::<T>() {
        Ok(parsed) => {
            debug!("Overriding {} from environment", var);
            *target = parsed;
        }
        Err(_) => warn!("Ignoring {}: not a valid number: {:?}", var, val),
    }
}

/// Resolve environment variables in a string value
///
/// Supports `${VAR_NAME}` and `$VAR_NAME`; the whole value must be the
/// reference. Unset variables leave the value as written.
fn resolve_env_var(value: &str) -> String {
    let var_name = if let Some(inner) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}'))
    {
        inner
    } else if let Some(inner) = value.strip_prefix('$') {
        if inner.is_empty() || inner.contains(' ') {
            return value.to_string();
        }
        inner
    } else {
        return value.to_string();
    };

    match std::env::var(var_name) {
        Ok(env_value) => {
            debug!("Resolved env var {} from config", var_name);
            env_value
        }
        Err(_) => {
            debug!("Env var {} not set, keeping original value", var_name);
            value.to_string()
        }
    }
}

/// Resolve environment variables in all config fields that support it
fn resolve_config_env_vars(config: &mut Config) {
    for proxy in &mut config.proxies {
        proxy.server_host = resolve_env_var(&proxy.server_host);
        proxy.credentials.username = resolve_env_var(&proxy.credentials.username);
        proxy.credentials.password = resolve_env_var(&proxy.credentials.password);
    }
}
