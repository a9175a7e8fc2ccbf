//! Bounds-checked integer access over byte slices
//!
//! TDS mixes byte orders: the packet header and PRELOGIN directory are
//! big-endian, LOGIN7 is little-endian. Every read checks its range and
//! reports [`TdsParseError::OffsetOutOfBounds`] instead of panicking.

use super::error::{Result, TdsParseError};

fn array<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N]> {
    let end = offset.checked_add(N).ok_or(TdsParseError::OffsetOutOfBounds)?;
    let bytes = data
        .get(offset..end)
        .ok_or(TdsParseError::OffsetOutOfBounds)?;
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Borrow `len` bytes starting at `offset`
pub fn slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    let end = offset
        .checked_add(len)
        .ok_or(TdsParseError::OffsetOutOfBounds)?;
    data.get(offset..end).ok_or(TdsParseError::OffsetOutOfBounds)
}

pub fn read_u8(data: &[u8], offset: usize) -> Result<u8> {
    data.get(offset)
        .copied()
        .ok_or(TdsParseError::OffsetOutOfBounds)
}

pub fn read_u16_be(data: &[u8], offset: usize) -> Result<u16> {
    array(data, offset).map(u16::from_be_bytes)
}

pub fn read_u16_le(data: &[u8], offset: usize) -> Result<u16> {
    array(data, offset).map(u16::from_le_bytes)
}

pub fn read_u32_le(data: &[u8], offset: usize) -> Result<u32> {
    array(data, offset).map(u32::from_le_bytes)
}

pub fn read_i32_le(data: &[u8], offset: usize) -> Result<i32> {
    array(data, offset).map(i32::from_le_bytes)
}

/// Overwrite `value.len()` bytes at `offset`
pub fn write_bytes(data: &mut [u8], offset: usize, value: &[u8]) -> Result<()> {
    let end = offset
        .checked_add(value.len())
        .ok_or(TdsParseError::OffsetOutOfBounds)?;
    let target = data
        .get_mut(offset..end)
        .ok_or(TdsParseError::OffsetOutOfBounds)?;
    target.copy_from_slice(value);
    Ok(())
}

pub fn write_u16_le(data: &mut [u8], offset: usize, value: u16) -> Result<()> {
    write_bytes(data, offset, &value.to_le_bytes())
}

pub fn write_u32_le(data: &mut [u8], offset: usize, value: u32) -> Result<()> {
    write_bytes(data, offset, &value.to_le_bytes())
}

pub fn write_i32_le(data: &mut [u8], offset: usize, value: i32) -> Result<()> {
    write_bytes(data, offset, &value.to_le_bytes())
}
