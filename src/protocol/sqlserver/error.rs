//! Codec errors for PRELOGIN and LOGIN7

/// Error type for TDS parsing and encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TdsParseError {
    /// Buffer ends before a fixed-size structure does
    TooShort,
    /// Option directory has no 0xFF sentinel
    MissingTerminator,
    /// Length field or replacement data of the wrong size
    InvalidLength,
    /// Invalid UTF-16 string
    InvalidString,
    /// Missing required field
    MissingField(&'static str),
    /// Offset out of bounds
    OffsetOutOfBounds,
    /// Encryption level code above 3
    InvalidEncryptionLevel(u8),
}

impl std::fmt::Display for TdsParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TdsParseError::TooShort => write!(f, "Packet too short"),
            TdsParseError::MissingTerminator => write!(f, "Option table has no terminator"),
            TdsParseError::InvalidLength => write!(f, "Invalid length field"),
            TdsParseError::InvalidString => write!(f, "Invalid UTF-16 string"),
            TdsParseError::MissingField(field) => write!(f, "Missing required field: {}", field),
            TdsParseError::OffsetOutOfBounds => write!(f, "Offset out of bounds"),
            TdsParseError::InvalidEncryptionLevel(code) => {
                write!(f, "Invalid encryption level: 0x{:02X}", code)
            }
        }
    }
}

impl std::error::Error for TdsParseError {}

pub type Result<T> = std::result::Result<T, TdsParseError>;
