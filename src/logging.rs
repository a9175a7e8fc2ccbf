//! Logging macros that set target to "tds_credential_proxy" for all log calls.
//!
//! Without an explicit target, tracing uses the full module path
//! (e.g., "tds_credential_proxy::server::pair"), so a filter such as
//! `tds_credential_proxy=debug` would have to name every module. These macros
//! put every event from this crate under a single target.

macro_rules! trace {
    ($($arg:tt)*) => { ::tracing::trace!(target: "tds_credential_proxy", $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { ::tracing::debug!(target: "tds_credential_proxy", $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { ::tracing::info!(target: "tds_credential_proxy", $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { ::tracing::warn!(target: "tds_credential_proxy", $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { ::tracing::error!(target: "tds_credential_proxy", $($arg)*) };
}
