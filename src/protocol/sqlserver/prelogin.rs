//! PRELOGIN option directory and the encryption byte
//!
//! A PRELOGIN payload starts with a directory of 5-byte entries
//! `(token u8, offset u16 BE, length u16 BE)` terminated by `0xFF`. Offsets
//! are relative to the payload start. The proxy only ever edits option data
//! in place, so the directory is kept as `(offset, length)` pairs and every
//! byte it does not touch is carried through unchanged.

use super::binary::{read_u16_be, read_u8, slice, write_bytes};
use super::constants::{encryption_bits, prelogin_token, PRELOGIN_OPTION_SIZE};
use super::error::{Result, TdsParseError};

/// One directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreloginOption {
    pub token: u8,
    pub offset: u16,
    pub length: u16,
}

impl PreloginOption {
    fn range(&self) -> (usize, usize) {
        (self.offset as usize, self.length as usize)
    }
}

/// Parsed PRELOGIN option directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionTable {
    options: Vec<PreloginOption>,
}

impl OptionTable {
    /// Parse the directory at the start of a PRELOGIN payload
    ///
    /// Fails with [`TdsParseError::MissingTerminator`] if the payload ends
    /// before the `0xFF` sentinel.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut options = Vec::new();
        let mut pos = 0;

        loop {
            let token = read_u8(payload, pos).map_err(|_| TdsParseError::MissingTerminator)?;
            if token == prelogin_token::TERMINATOR {
                break;
            }
            if pos + PRELOGIN_OPTION_SIZE > payload.len() {
                return Err(TdsParseError::TooShort);
            }
            options.push(PreloginOption {
                token,
                offset: read_u16_be(payload, pos + 1)?,
                length: read_u16_be(payload, pos + 3)?,
            });
            pos += PRELOGIN_OPTION_SIZE;
        }

        Ok(Self { options })
    }

    pub fn options(&self) -> &[PreloginOption] {
        &self.options
    }

    /// Directory entry for `token`; the last one wins on duplicates
    pub fn get(&self, token: u8) -> Option<&PreloginOption> {
        self.options.iter().rev().find(|o| o.token == token)
    }

    /// Copy out the data of `token`, or `None` if the option is absent
    pub fn option_data(&self, payload: &[u8], token: u8) -> Result<Option<Vec<u8>>> {
        match self.get(token) {
            Some(option) => {
                let (offset, length) = option.range();
                Ok(Some(slice(payload, offset, length)?.to_vec()))
            }
            None => Ok(None),
        }
    }

    /// Overwrite the data of `token` in place
    ///
    /// `data` must be exactly as long as the existing option; the directory
    /// itself is never changed.
    pub fn set_option_data(&self, payload: &mut [u8], token: u8, data: &[u8]) -> Result<()> {
        let option = self
            .get(token)
            .ok_or(TdsParseError::MissingField(option_name(token)))?;
        let (offset, length) = option.range();
        if data.len() != length {
            return Err(TdsParseError::InvalidLength);
        }
        write_bytes(payload, offset, data)
    }
}

fn option_name(token: u8) -> &'static str {
    match token {
        prelogin_token::VERSION => "VERSION",
        prelogin_token::ENCRYPTION => "ENCRYPTION",
        prelogin_token::INSTOPT => "INSTOPT",
        prelogin_token::THREADID => "THREADID",
        prelogin_token::MARS => "MARS",
        _ => "PRELOGIN option",
    }
}

/// Encryption levels for PRELOGIN negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum EncryptionLevel {
    /// Encrypt the login packet only
    #[default]
    Off = 0x00,
    /// Encryption is on
    On = 0x01,
    /// Encryption is not supported
    NotSupported = 0x02,
    /// Encryption is required
    Required = 0x03,
}

impl EncryptionLevel {
    pub const ALL: [EncryptionLevel; 4] = [
        EncryptionLevel::Off,
        EncryptionLevel::On,
        EncryptionLevel::NotSupported,
        EncryptionLevel::Required,
    ];

    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0x00 => Ok(EncryptionLevel::Off),
            0x01 => Ok(EncryptionLevel::On),
            0x02 => Ok(EncryptionLevel::NotSupported),
            0x03 => Ok(EncryptionLevel::Required),
            other => Err(TdsParseError::InvalidEncryptionLevel(other)),
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for EncryptionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EncryptionLevel::Off => "OFF",
            EncryptionLevel::On => "ON",
            EncryptionLevel::NotSupported => "NOT_SUPPORTED",
            EncryptionLevel::Required => "REQUIRED",
        };
        f.write_str(name)
    }
}

/// Decoded PRELOGIN encryption byte
///
/// Low two bits carry the level, bit 7 the client certificate flag. Other
/// bits are dropped on re-encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncryptionState {
    pub level: EncryptionLevel,
    pub client_cert: bool,
}

impl EncryptionState {
    pub fn new(level: EncryptionLevel, client_cert: bool) -> Self {
        Self { level, client_cert }
    }

    pub fn from_byte(b: u8) -> Self {
        // Masked to two bits, so every code is valid
        let level = match b & encryption_bits::LEVEL_MASK {
            0x00 => EncryptionLevel::Off,
            0x01 => EncryptionLevel::On,
            0x02 => EncryptionLevel::NotSupported,
            _ => EncryptionLevel::Required,
        };
        Self {
            level,
            client_cert: b & encryption_bits::CLIENT_CERT != 0,
        }
    }

    pub fn to_byte(self) -> u8 {
        let cert = if self.client_cert {
            encryption_bits::CLIENT_CERT
        } else {
            0
        };
        self.level.code() | cert
    }
}

/// Replace the encryption byte of a PRELOGIN payload
///
/// Returns the rewritten payload and the state it replaced. A payload without
/// an encryption option, or with one of length zero, cannot be rewritten.
pub fn rewrite_encryption(
    payload: &[u8],
    state: EncryptionState,
) -> Result<(Vec<u8>, EncryptionState)> {
    let table = OptionTable::parse(payload)?;
    let current = table
        .option_data(payload, prelogin_token::ENCRYPTION)?
        .ok_or(TdsParseError::MissingField("ENCRYPTION"))?;
    let previous = current
        .first()
        .copied()
        .map(EncryptionState::from_byte)
        .ok_or(TdsParseError::MissingField("ENCRYPTION"))?;

    let mut replacement = current;
    replacement[0] = state.to_byte();

    let mut rewritten = payload.to_vec();
    table.set_option_data(&mut rewritten, prelogin_token::ENCRYPTION, &replacement)?;
    Ok((rewritten, previous))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// VERSION (6 bytes) + ENCRYPTION (1 byte) + MARS (1 byte), terminator
    fn client_prelogin(encryption: u8) -> Vec<u8> {
        let mut p = vec![
            0x00, 0x00, 0x10, 0x00, 0x06, // VERSION at 16, len 6
            0x01, 0x00, 0x16, 0x00, 0x01, // ENCRYPTION at 22, len 1
            0x04, 0x00, 0x17, 0x00, 0x01, // MARS at 23, len 1
            0xFF,
        ];
        p.extend_from_slice(&[0x0F, 0x00, 0x07, 0xD0, 0x00, 0x00]);
        p.push(encryption);
        p.push(0x00);
        p
    }

    // ========================================================================
    // Option table
    // ========================================================================

    #[test]
    fn test_parse_directory() {
        let payload = client_prelogin(0x00);
        let table = OptionTable::parse(&payload).unwrap();
        assert_eq!(table.options().len(), 3);
        assert_eq!(
            table.get(prelogin_token::ENCRYPTION),
            Some(&PreloginOption {
                token: 0x01,
                offset: 22,
                length: 1
            })
        );
    }

    #[test]
    fn test_parse_terminator_only() {
        let table = OptionTable::parse(&[0xFF]).unwrap();
        assert!(table.options().is_empty());
    }

    #[test]
    fn test_parse_missing_terminator() {
        let payload = [0x00, 0x00, 0x06, 0x00, 0x01, 0x01];
        assert_eq!(
            OptionTable::parse(&payload),
            Err(TdsParseError::MissingTerminator)
        );
        assert_eq!(OptionTable::parse(&[]), Err(TdsParseError::MissingTerminator));
    }

    #[test]
    fn test_parse_partial_entry() {
        assert_eq!(
            OptionTable::parse(&[0x01, 0x00, 0x06]),
            Err(TdsParseError::TooShort)
        );
    }

    #[test]
    fn test_duplicate_token_last_wins() {
        let payload = [
            0x01, 0x00, 0x0B, 0x00, 0x01, // ENCRYPTION at 11
            0x01, 0x00, 0x0C, 0x00, 0x01, // ENCRYPTION at 12
            0xFF, 0x00, 0x03,
        ];
        let table = OptionTable::parse(&payload).unwrap();
        assert_eq!(
            table.option_data(&payload, prelogin_token::ENCRYPTION).unwrap(),
            Some(vec![0x03])
        );
    }

    #[test]
    fn test_option_data_out_of_range() {
        let payload = [0x01, 0x00, 0x40, 0x00, 0x01, 0xFF];
        let table = OptionTable::parse(&payload).unwrap();
        assert_eq!(
            table.option_data(&payload, prelogin_token::ENCRYPTION),
            Err(TdsParseError::OffsetOutOfBounds)
        );
    }

    #[test]
    fn test_set_option_data_requires_same_length() {
        let mut payload = client_prelogin(0x00);
        let table = OptionTable::parse(&payload).unwrap();
        assert_eq!(
            table.set_option_data(&mut payload, prelogin_token::ENCRYPTION, &[1, 2]),
            Err(TdsParseError::InvalidLength)
        );
        table
            .set_option_data(&mut payload, prelogin_token::MARS, &[0x01])
            .unwrap();
        assert_eq!(payload[23], 0x01);
    }

    // ========================================================================
    // Encryption state
    // ========================================================================

    #[test]
    fn test_encryption_state_roundtrip_all() {
        for level in EncryptionLevel::ALL {
            for client_cert in [false, true] {
                let state = EncryptionState::new(level, client_cert);
                assert_eq!(EncryptionState::from_byte(state.to_byte()), state);
            }
        }
    }

    #[test]
    fn test_encryption_state_bits() {
        assert_eq!(
            EncryptionState::new(EncryptionLevel::Required, true).to_byte(),
            0x83
        );
        let state = EncryptionState::from_byte(0x81);
        assert_eq!(state.level, EncryptionLevel::On);
        assert!(state.client_cert);
    }

    #[test]
    fn test_encryption_level_from_code() {
        assert_eq!(EncryptionLevel::from_code(2), Ok(EncryptionLevel::NotSupported));
        assert_eq!(
            EncryptionLevel::from_code(4),
            Err(TdsParseError::InvalidEncryptionLevel(4))
        );
    }

    // ========================================================================
    // Rewrite
    // ========================================================================

    #[test]
    fn test_rewrite_encryption_only_touches_one_byte() {
        let payload = client_prelogin(0x00);
        let (rewritten, previous) = rewrite_encryption(
            &payload,
            EncryptionState::new(EncryptionLevel::Required, false),
        )
        .unwrap();

        assert_eq!(previous.level, EncryptionLevel::Off);
        assert_eq!(rewritten.len(), payload.len());
        for (i, (a, b)) in payload.iter().zip(&rewritten).enumerate() {
            if i == 22 {
                assert_eq!(*b, 0x03);
            } else {
                assert_eq!(a, b, "byte {} changed", i);
            }
        }
    }

    #[test]
    fn test_rewrite_encryption_missing_option() {
        let payload = [0x00, 0x00, 0x06, 0x00, 0x01, 0xFF, 0x0F];
        assert_eq!(
            rewrite_encryption(&payload, EncryptionState::default()),
            Err(TdsParseError::MissingField("ENCRYPTION"))
        );
    }

    #[test]
    fn test_rewrite_encryption_clears_client_cert() {
        let payload = client_prelogin(0x81);
        let (rewritten, previous) = rewrite_encryption(
            &payload,
            EncryptionState::new(EncryptionLevel::Required, false),
        )
        .unwrap();
        assert!(previous.client_cert);
        assert_eq!(rewritten[22], 0x03);
    }
}
