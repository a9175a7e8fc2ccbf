//! Server module for tds-credential-proxy
//!
//! This module contains:
//! - TCP listener, one per proxy definition
//! - Connection pair driver
//! - Negotiation engine (sans-IO)
//! - Established-phase relay

pub mod listener;
pub mod negotiation;
pub mod pair;
pub mod relay;

pub use listener::{Listener, ListenerStats};
pub use negotiation::{Negotiator, Phase, RequestAction};
pub use pair::{ConnectionPair, PairSettings};
pub use relay::{Direction, Session};
