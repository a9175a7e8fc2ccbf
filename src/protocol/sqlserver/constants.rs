//! TDS protocol constants
//!
//! Only the subset of MS-TDS that the proxy interprets lives here: packet
//! types, status bits, the PRELOGIN encryption token and the LOGIN7 layout.

/// TDS packet types
pub mod packet_type {
    /// SQL batch (query)
    pub const SQL_BATCH: u8 = 0x01;
    /// Tabular result; also the type of every server response
    pub const TABULAR_RESULT: u8 = 0x04;
    /// TDS7 login
    pub const LOGIN7: u8 = 0x10;
    /// Pre-login, also used to carry the upstream TLS handshake
    pub const PRELOGIN: u8 = 0x12;
}

/// TDS packet status flags
pub mod status {
    /// Normal message
    pub const NORMAL: u8 = 0x00;
    /// End of message (last packet in request)
    pub const EOM: u8 = 0x01;
}

/// TDS protocol versions
pub mod version {
    /// TDS 7.1 (SQL Server 2000)
    pub const TDS_7_1: u32 = 0x7100_0000;
    /// TDS 7.2 (SQL Server 2005, "Yukon"). LOGIN7 grows two trailing fields here.
    pub const YUKON: u32 = 0x7209_0002;
    /// TDS 7.4 (SQL Server 2012+)
    pub const TDS_7_4: u32 = 0x7400_0004;
}

/// PRELOGIN option tokens
pub mod prelogin_token {
    /// Version information
    pub const VERSION: u8 = 0x00;
    /// Encryption setting
    pub const ENCRYPTION: u8 = 0x01;
    /// Instance name
    pub const INSTOPT: u8 = 0x02;
    /// Thread ID
    pub const THREADID: u8 = 0x03;
    /// MARS (Multiple Active Result Sets)
    pub const MARS: u8 = 0x04;
    /// Terminator
    pub const TERMINATOR: u8 = 0xFF;
}

/// Bits of the PRELOGIN encryption byte
pub mod encryption_bits {
    /// Mask selecting the encryption level
    pub const LEVEL_MASK: u8 = 0x03;
    /// Client certificate authentication requested
    pub const CLIENT_CERT: u8 = 0x80;
}

/// LOGIN7 option flags 3
pub mod option_flags3 {
    /// fExtension: ibExtension points at a FeatureExt block
    pub const EXTENSION: u8 = 0x10;
}

/// LOGIN7 feature extension terminator
pub const FEATURE_EXT_TERMINATOR: u8 = 0xFF;

/// TDS packet header size
pub const TDS_HEADER_SIZE: usize = 8;

/// Largest value the 16-bit header length can hold
pub const MAX_PACKET_SIZE: usize = u16::MAX as usize;

/// Fixed LOGIN7 size before TDS 7.2
pub const LOGIN7_BASE_SIZE: usize = 86;

/// Fixed LOGIN7 size from TDS 7.2 on (password change locator + long SSPI length)
pub const LOGIN7_YUKON_SIZE: usize = 94;

/// Size of one PRELOGIN option directory entry
pub const PRELOGIN_OPTION_SIZE: usize = 5;

/// XOR key applied to each UCS-2 code unit of an obfuscated password
pub const PASSWORD_XOR_KEY: u16 = 0x5A5A;
