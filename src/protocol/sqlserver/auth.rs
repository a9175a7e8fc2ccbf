//! LOGIN7 password obfuscation and UCS-2 helpers
//!
//! TDS does not encrypt the LOGIN7 password. It XORs every UCS-2 code unit
//! with `0x5A5A` and swaps the nibbles of each resulting byte. Applied to the
//! little-endian bytes this is `swap_nibbles(b) ^ 0xA5` per byte, which is
//! the form used here.
//!
//! **Security Note:** the transform is reversible by anyone. The proxy only
//! ever emits a rewritten password over an established upstream TLS session.

use zeroize::Zeroize;

use super::constants::PASSWORD_XOR_KEY;

// XOR before the swap equals XOR with the swapped key after it
const BYTE_KEY: u8 = ((PASSWORD_XOR_KEY & 0xFF) as u8).rotate_left(4);

fn swap_nibbles(b: u8) -> u8 {
    b.rotate_left(4)
}

/// Obfuscate one byte of a UTF-16LE password
pub fn obfuscate_byte(b: u8) -> u8 {
    swap_nibbles(b) ^ BYTE_KEY
}

/// Inverse of [`obfuscate_byte`]
pub fn deobfuscate_byte(b: u8) -> u8 {
    swap_nibbles(b ^ BYTE_KEY)
}

/// Encode a password per TDS specification
///
/// Converts to UTF-16LE, then swaps nibbles and XORs with 0xA5 per byte.
///
/// # Arguments
///
/// * `password` - The plaintext password to encode
///
/// # Returns
///
/// Encoded password bytes (UTF-16LE with TDS obfuscation applied)
pub fn encode_password(password: &str) -> Vec<u8> {
    password
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .map(obfuscate_byte)
        .collect()
}

/// Decode an obfuscated LOGIN7 password
///
/// Returns `None` for an odd byte count or invalid UTF-16.
pub fn decode_password(encoded: &[u8]) -> Option<String> {
    let mut plain: Vec<u8> = encoded.iter().map(|&b| deobfuscate_byte(b)).collect();
    let decoded = utf16le_to_string(&plain);
    plain.zeroize();
    decoded
}

/// Convert a string to UTF-16LE bytes
pub fn string_to_utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
}

/// Convert UTF-16LE bytes back to a string
///
/// # Returns
///
/// Decoded string, or None if invalid UTF-16
#[allow(clippy::manual_is_multiple_of)]
pub fn utf16le_to_string(bytes: &[u8]) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }

    let u16_chars: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|chunk| u16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();

    String::from_utf16(&u16_chars).ok()
}
