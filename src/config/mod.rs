//! Configuration module for tds-credential-proxy
//!
//! Proxies come from a YAML file, a connection-list string, or both:
//!
//! ```yaml
//! server:
//!   tls_handshake_timeout_secs: 15
//! proxies:
//!   - bind_port: 1433
//!     server_host: "sql.internal"
//!     credentials:
//!       username: "app_user"
//!       password: "${SQL_APP_PASSWORD}"
//! ```
//!
//! ```text
//! MSSQLPROXY_PROXIES=0.0.0.0:1433=app_user:secret@sql.internal:1433
//! ```

mod loader;
mod proxies;
mod types;

pub use loader::{apply_env_overrides, load_config, load_config_from_str};
pub use proxies::{parse_endpoint, parse_proxy_definition, parse_proxy_list, EXPECTED_FORMAT};
pub use types::*;
