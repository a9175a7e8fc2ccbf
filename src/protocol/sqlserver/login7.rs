//! LOGIN7 codec
//!
//! LOGIN7 is a fixed little-endian header followed by a variable region.
//! Strings and blobs in the variable region are addressed by
//! `(offset u16, length u16)` locators in the header; string lengths count
//! UCS-2 code units, blob lengths count bytes. Offsets are derived again on
//! every encode and never stored, so editing a field cannot leave a stale
//! locator behind.
//!
//! Fixed header layout (offsets into the payload):
//!
//! ```text
//!  0 length u32          4 tds_version u32     8 packet_size u32
//! 12 client_prog_ver[4] 16 client_pid u32     20 connection_id u32
//! 24 flags1  25 flags2  26 type_flags  27 flags3
//! 28 timezone i32       32 lcid u32
//! 36 hostname  40 username  44 password  48 app_name  52 server_name
//! 56 extension  60 library  64 language  68 database  72 client_id[6]
//! 78 sspi  82 attach_db_file  86 change_password (7.2+)  90 sspi_long u32 (7.2+)
//! ```

use zeroize::Zeroize;

use super::auth::{decode_password, encode_password, string_to_utf16le, utf16le_to_string};
use super::binary::{
    read_i32_le, read_u16_le, read_u32_le, read_u8, slice, write_bytes, write_i32_le,
    write_u16_le, write_u32_le,
};
use super::constants::{
    option_flags3, version, FEATURE_EXT_TERMINATOR, LOGIN7_BASE_SIZE, LOGIN7_YUKON_SIZE,
};
use super::error::{Result, TdsParseError};

mod offset {
    pub const LENGTH: usize = 0;
    pub const TDS_VERSION: usize = 4;
    pub const PACKET_SIZE: usize = 8;
    pub const CLIENT_PROG_VER: usize = 12;
    pub const CLIENT_PID: usize = 16;
    pub const CONNECTION_ID: usize = 20;
    pub const OPTION_FLAGS1: usize = 24;
    pub const OPTION_FLAGS2: usize = 25;
    pub const TYPE_FLAGS: usize = 26;
    pub const OPTION_FLAGS3: usize = 27;
    pub const CLIENT_TIMEZONE: usize = 28;
    pub const CLIENT_LCID: usize = 32;
    pub const HOSTNAME: usize = 36;
    pub const USERNAME: usize = 40;
    pub const PASSWORD: usize = 44;
    pub const APP_NAME: usize = 48;
    pub const SERVER_NAME: usize = 52;
    pub const EXTENSION: usize = 56;
    pub const LIBRARY_NAME: usize = 60;
    pub const LANGUAGE: usize = 64;
    pub const DATABASE: usize = 68;
    pub const CLIENT_ID: usize = 72;
    pub const SSPI: usize = 78;
    pub const ATTACH_DB_FILE: usize = 82;
    pub const CHANGE_PASSWORD: usize = 86;
    pub const SSPI_LONG: usize = 90;
}

/// Size of the extension pointer stored in the variable region
const EXTENSION_POINTER_SIZE: usize = 4;

/// One FeatureExt record: `(feature_id u8, length u32 LE, data)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureExt {
    pub feature_id: u8,
    pub data: Vec<u8>,
}

/// Decoded LOGIN7 payload
///
/// Password fields hold plaintext; obfuscation is applied on encode.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Login7 {
    pub tds_version: u32,
    pub packet_size: u32,
    pub client_prog_version: [u8; 4],
    pub client_pid: u32,
    pub connection_id: u32,
    pub option_flags1: u8,
    pub option_flags2: u8,
    pub type_flags: u8,
    pub option_flags3: u8,
    pub client_timezone: i32,
    pub client_lcid: u32,
    pub hostname: String,
    pub username: String,
    pub password: String,
    pub app_name: String,
    pub server_name: String,
    pub library_name: String,
    pub language: String,
    pub database: String,
    pub client_id: [u8; 6],
    pub sspi: Vec<u8>,
    pub attach_db_file: String,
    /// Only carried on the wire for TDS 7.2 and later
    pub change_password: String,
    /// `Some` when the extension flag is set and an extension block is present
    pub feature_ext: Option<Vec<FeatureExt>>,
}

impl std::fmt::Debug for Login7 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Login7")
            .field("tds_version", &format!("0x{:08X}", self.tds_version))
            .field("packet_size", &self.packet_size)
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("app_name", &self.app_name)
            .field("server_name", &self.server_name)
            .field("library_name", &self.library_name)
            .field("database", &self.database)
            .field("sspi_len", &self.sspi.len())
            .field("feature_ext", &self.feature_ext)
            .finish_non_exhaustive()
    }
}

impl Login7 {
    /// Whether this login uses the TDS 7.2+ header with two extra fields
    pub fn is_yukon_or_later(&self) -> bool {
        self.tds_version >= version::YUKON
    }

    fn header_size(&self) -> usize {
        if self.is_yukon_or_later() {
            LOGIN7_YUKON_SIZE
        } else {
            LOGIN7_BASE_SIZE
        }
    }

    /// Overwrite both password fields in memory
    pub fn wipe_secrets(&mut self) {
        self.password.zeroize();
        self.change_password.zeroize();
    }

    /// Replace the SQL authentication credentials
    pub fn set_credentials(&mut self, username: &str, password: &str) {
        self.username.zeroize();
        self.password.zeroize();
        self.username = username.to_string();
        self.password = password.to_string();
    }

    /// Decode a LOGIN7 payload (without the TDS header)
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < LOGIN7_BASE_SIZE {
            return Err(TdsParseError::TooShort);
        }

        let tds_version = read_u32_le(payload, offset::TDS_VERSION)?;
        let yukon = tds_version >= version::YUKON;
        if yukon && payload.len() < LOGIN7_YUKON_SIZE {
            return Err(TdsParseError::TooShort);
        }

        let mut client_prog_version = [0u8; 4];
        client_prog_version.copy_from_slice(slice(payload, offset::CLIENT_PROG_VER, 4)?);
        let mut client_id = [0u8; 6];
        client_id.copy_from_slice(slice(payload, offset::CLIENT_ID, 6)?);

        let option_flags3 = read_u8(payload, offset::OPTION_FLAGS3)?;

        let sspi = {
            let start = read_u16_le(payload, offset::SSPI)? as usize;
            let mut len = read_u16_le(payload, offset::SSPI + 2)? as usize;
            if yukon {
                let long_len = read_u32_le(payload, offset::SSPI_LONG)? as usize;
                if long_len != 0 {
                    len = long_len;
                }
            }
            slice(payload, start, len)?.to_vec()
        };

        let change_password = if yukon {
            read_password(payload, offset::CHANGE_PASSWORD)?
        } else {
            String::new()
        };

        let feature_ext = if option_flags3 & option_flags3::EXTENSION != 0 {
            read_feature_ext(payload)?
        } else {
            None
        };

        Ok(Self {
            tds_version,
            packet_size: read_u32_le(payload, offset::PACKET_SIZE)?,
            client_prog_version,
            client_pid: read_u32_le(payload, offset::CLIENT_PID)?,
            connection_id: read_u32_le(payload, offset::CONNECTION_ID)?,
            option_flags1: read_u8(payload, offset::OPTION_FLAGS1)?,
            option_flags2: read_u8(payload, offset::OPTION_FLAGS2)?,
            type_flags: read_u8(payload, offset::TYPE_FLAGS)?,
            option_flags3,
            client_timezone: read_i32_le(payload, offset::CLIENT_TIMEZONE)?,
            client_lcid: read_u32_le(payload, offset::CLIENT_LCID)?,
            hostname: read_string(payload, offset::HOSTNAME)?,
            username: read_string(payload, offset::USERNAME)?,
            password: read_password(payload, offset::PASSWORD)?,
            app_name: read_string(payload, offset::APP_NAME)?,
            server_name: read_string(payload, offset::SERVER_NAME)?,
            library_name: read_string(payload, offset::LIBRARY_NAME)?,
            language: read_string(payload, offset::LANGUAGE)?,
            database: read_string(payload, offset::DATABASE)?,
            client_id,
            sspi,
            attach_db_file: read_string(payload, offset::ATTACH_DB_FILE)?,
            change_password,
            feature_ext,
        })
    }

    /// Encode to a LOGIN7 payload (without the TDS header)
    ///
    /// Variable data is laid out in locator order. Empty fields get a
    /// zero offset and length.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let yukon = self.is_yukon_or_later();
        let mut out = vec![0u8; self.header_size()];

        write_u32_le(&mut out, offset::TDS_VERSION, self.tds_version)?;
        write_u32_le(&mut out, offset::PACKET_SIZE, self.packet_size)?;
        write_bytes(&mut out, offset::CLIENT_PROG_VER, &self.client_prog_version)?;
        write_u32_le(&mut out, offset::CLIENT_PID, self.client_pid)?;
        write_u32_le(&mut out, offset::CONNECTION_ID, self.connection_id)?;
        out[offset::OPTION_FLAGS1] = self.option_flags1;
        out[offset::OPTION_FLAGS2] = self.option_flags2;
        out[offset::TYPE_FLAGS] = self.type_flags;
        out[offset::OPTION_FLAGS3] = self.option_flags3;
        write_i32_le(&mut out, offset::CLIENT_TIMEZONE, self.client_timezone)?;
        write_u32_le(&mut out, offset::CLIENT_LCID, self.client_lcid)?;

        push_string(&mut out, offset::HOSTNAME, &self.hostname)?;
        push_string(&mut out, offset::USERNAME, &self.username)?;
        push_password(&mut out, offset::PASSWORD, &self.password)?;
        push_string(&mut out, offset::APP_NAME, &self.app_name)?;
        push_string(&mut out, offset::SERVER_NAME, &self.server_name)?;

        let extension_pointer = match self.feature_ext {
            Some(_) => {
                let at = out.len();
                push_field(
                    &mut out,
                    offset::EXTENSION,
                    &[0u8; EXTENSION_POINTER_SIZE],
                    EXTENSION_POINTER_SIZE,
                )?;
                Some(at)
            }
            None => None,
        };

        push_string(&mut out, offset::LIBRARY_NAME, &self.library_name)?;
        push_string(&mut out, offset::LANGUAGE, &self.language)?;
        push_string(&mut out, offset::DATABASE, &self.database)?;
        write_bytes(&mut out, offset::CLIENT_ID, &self.client_id)?;

        if self.sspi.len() > u16::MAX as usize {
            if !yukon {
                return Err(TdsParseError::InvalidLength);
            }
            push_field(&mut out, offset::SSPI, &self.sspi, u16::MAX as usize)?;
            write_u32_le(&mut out, offset::SSPI_LONG, self.sspi.len() as u32)?;
        } else {
            push_field(&mut out, offset::SSPI, &self.sspi, self.sspi.len())?;
        }

        push_string(&mut out, offset::ATTACH_DB_FILE, &self.attach_db_file)?;
        if yukon {
            push_password(&mut out, offset::CHANGE_PASSWORD, &self.change_password)?;
        }

        if let (Some(pointer), Some(features)) = (extension_pointer, &self.feature_ext) {
            let ext_offset = u32::try_from(out.len()).map_err(|_| TdsParseError::InvalidLength)?;
            write_u32_le(&mut out, pointer, ext_offset)?;
            for feature in features {
                let len = u32::try_from(feature.data.len())
                    .map_err(|_| TdsParseError::InvalidLength)?;
                out.push(feature.feature_id);
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(&feature.data);
            }
            out.push(FEATURE_EXT_TERMINATOR);
        }

        let total = u32::try_from(out.len()).map_err(|_| TdsParseError::InvalidLength)?;
        write_u32_le(&mut out, offset::LENGTH, total)?;
        Ok(out)
    }
}

/// Decode, substitute credentials, re-encode
///
/// Returns the new payload and the username the client sent.
pub fn rewrite_credentials(
    payload: &[u8],
    username: &str,
    password: &str,
) -> Result<(Vec<u8>, String)> {
    let mut login = Login7::decode(payload)?;
    let original_user = std::mem::take(&mut login.username);
    login.set_credentials(username, password);
    let encoded = login.encode();
    login.wipe_secrets();
    Ok((encoded?, original_user))
}

fn locator(payload: &[u8], at: usize) -> Result<(usize, usize)> {
    Ok((
        read_u16_le(payload, at)? as usize,
        read_u16_le(payload, at + 2)? as usize,
    ))
}

fn read_string(payload: &[u8], at: usize) -> Result<String> {
    let (start, chars) = locator(payload, at)?;
    let bytes = slice(payload, start, chars * 2)?;
    utf16le_to_string(bytes).ok_or(TdsParseError::InvalidString)
}

fn read_password(payload: &[u8], at: usize) -> Result<String> {
    let (start, chars) = locator(payload, at)?;
    let bytes = slice(payload, start, chars * 2)?;
    decode_password(bytes).ok_or(TdsParseError::InvalidString)
}

fn read_feature_ext(payload: &[u8]) -> Result<Option<Vec<FeatureExt>>> {
    let (start, len) = locator(payload, offset::EXTENSION)?;
    if len < EXTENSION_POINTER_SIZE {
        return Ok(None);
    }

    let mut pos = read_u32_le(payload, start)? as usize;
    let mut features = Vec::new();
    loop {
        let feature_id = read_u8(payload, pos)?;
        if feature_id == FEATURE_EXT_TERMINATOR {
            break;
        }
        let data_len = read_u32_le(payload, pos + 1)? as usize;
        let data = slice(payload, pos + 5, data_len)?.to_vec();
        features.push(FeatureExt { feature_id, data });
        pos += 5 + data_len;
    }
    Ok(Some(features))
}

/// Append `bytes` and point the locator at `at` to them
fn push_field(out: &mut Vec<u8>, at: usize, bytes: &[u8], units: usize) -> Result<()> {
    if bytes.is_empty() {
        write_u16_le(out, at, 0)?;
        return write_u16_le(out, at + 2, 0);
    }
    let start = u16::try_from(out.len()).map_err(|_| TdsParseError::InvalidLength)?;
    let units = u16::try_from(units).map_err(|_| TdsParseError::InvalidLength)?;
    write_u16_le(out, at, start)?;
    write_u16_le(out, at + 2, units)?;
    out.extend_from_slice(bytes);
    Ok(())
}

fn push_string(out: &mut Vec<u8>, at: usize, value: &str) -> Result<()> {
    let bytes = string_to_utf16le(value);
    push_field(out, at, &bytes, bytes.len() / 2)
}

fn push_password(out: &mut Vec<u8>, at: usize, value: &str) -> Result<()> {
    let mut bytes = encode_password(value);
    let result = push_field(out, at, &bytes, bytes.len() / 2);
    bytes.zeroize();
    result
}
