//! SQL Server TDS protocol implementation
//!
//! Only the parts of TDS (Tabular Data Stream) the proxy has to understand
//! are implemented: message framing, the PRELOGIN option directory and its
//! encryption byte, the LOGIN7 record and the TDS-wrapped TLS handshake.
//! Everything else is forwarded as opaque framed messages.
//!
//! ## Connection flow as seen by the proxy
//!
//! 1. Client sends PRELOGIN; encryption is forced to REQUIRED upstream
//! 2. Server responds with PRELOGIN; encryption is reported as NOT_SUPPORTED
//!    to the client
//! 3. Client sends LOGIN7 in plaintext; the proxy holds it
//! 4. The proxy performs the TLS handshake with the server inside PRELOGIN
//!    packets
//! 5. LOGIN7 is sent upstream over TLS with the configured credentials
//! 6. Remaining traffic is relayed message by message
//!
//! ## References
//!
//! - [MS-TDS]: Tabular Data Stream Protocol
//!   <https://docs.microsoft.com/en-us/openspecs/windows_protocols/ms-tds/>

pub mod auth;
pub mod binary;
pub mod classifier;
pub mod constants;
pub mod error;
pub mod framer;
pub mod login7;
pub mod packets;
pub mod prelogin;
pub mod tds_tls_stream;

// Re-export commonly used types
pub use classifier::{classify_request, Request, Response, ResponseClassifier};
pub use error::TdsParseError;
pub use framer::{write_message, MessageReader, TdsFramer};
pub use login7::{FeatureExt, Login7};
pub use packets::{Message, TdsHeader};
pub use prelogin::{EncryptionLevel, EncryptionState, OptionTable, PreloginOption};
pub use tds_tls_stream::TdsTlsStream;
