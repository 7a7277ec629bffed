//! Byte-level encode/decode primitives used by the packet and data-buffer
//! layers. Every multi-byte value is network (big-endian) byte order on the
//! wire; conversion to host order happens at the accessor boundary.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder};
use crc::{Crc, CRC_16_IBM_3740};

/// CRC-16/CCITT-FALSE: poly `0x1021`, init `0xFFFF`, no input/output
/// reflection, no final xor.
///
/// The original project's own CRC source was not available to ground this
/// bit-for-bit (see DESIGN.md); this is the standard "CCITT" variant and is
/// easy to swap for another [`crc::Width16Algorithm`] if a golden vector
/// surfaces later.
static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Computes the CRC-16 used as a packet trailer over `bytes`.
#[must_use]
pub fn crc16(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}

/// Reads a big-endian `u8` at `offset`, failing if `bytes` is too short.
pub fn read_u8(bytes: &[u8], offset: usize) -> Result<u8> {
    bytes.get(offset).copied().ok_or(Error::Truncated)
}

/// Reads a big-endian `u16` at `offset`.
pub fn read_u16(bytes: &[u8], offset: usize) -> Result<u16> {
    let slice = bytes.get(offset..offset + 2).ok_or(Error::Truncated)?;
    Ok(BigEndian::read_u16(slice))
}

/// Reads a big-endian `u32` at `offset`.
pub fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    let slice = bytes.get(offset..offset + 4).ok_or(Error::Truncated)?;
    Ok(BigEndian::read_u32(slice))
}

/// Reads a big-endian `u64` at `offset`.
pub fn read_u64(bytes: &[u8], offset: usize) -> Result<u64> {
    let slice = bytes.get(offset..offset + 8).ok_or(Error::Truncated)?;
    Ok(BigEndian::read_u64(slice))
}

/// Reads a big-endian IEEE-754 `f32` at `offset`.
pub fn read_f32(bytes: &[u8], offset: usize) -> Result<f32> {
    let slice = bytes.get(offset..offset + 4).ok_or(Error::Truncated)?;
    Ok(BigEndian::read_f32(slice))
}

/// Reads a big-endian IEEE-754 `f64` at `offset`.
pub fn read_f64(bytes: &[u8], offset: usize) -> Result<f64> {
    let slice = bytes.get(offset..offset + 8).ok_or(Error::Truncated)?;
    Ok(BigEndian::read_f64(slice))
}

/// Writes `value` as big-endian at `offset`, failing if `bytes` is too
/// short to hold it.
pub fn write_u8(bytes: &mut [u8], offset: usize, value: u8) -> Result<()> {
    let dst = bytes.get_mut(offset).ok_or(Error::Overflow)?;
    *dst = value;
    Ok(())
}

/// Writes a big-endian `u16` at `offset`.
pub fn write_u16(bytes: &mut [u8], offset: usize, value: u16) -> Result<()> {
    let slice = bytes.get_mut(offset..offset + 2).ok_or(Error::Overflow)?;
    BigEndian::write_u16(slice, value);
    Ok(())
}

/// Writes a big-endian `u32` at `offset`.
pub fn write_u32(bytes: &mut [u8], offset: usize, value: u32) -> Result<()> {
    let slice = bytes.get_mut(offset..offset + 4).ok_or(Error::Overflow)?;
    BigEndian::write_u32(slice, value);
    Ok(())
}

/// Writes a big-endian `u64` at `offset`.
pub fn write_u64(bytes: &mut [u8], offset: usize, value: u64) -> Result<()> {
    let slice = bytes.get_mut(offset..offset + 8).ok_or(Error::Overflow)?;
    BigEndian::write_u64(slice, value);
    Ok(())
}

/// Writes a big-endian IEEE-754 `f32` at `offset`.
pub fn write_f32(bytes: &mut [u8], offset: usize, value: f32) -> Result<()> {
    let slice = bytes.get_mut(offset..offset + 4).ok_or(Error::Overflow)?;
    BigEndian::write_f32(slice, value);
    Ok(())
}

/// Writes a big-endian IEEE-754 `f64` at `offset`.
pub fn write_f64(bytes: &mut [u8], offset: usize, value: f64) -> Result<()> {
    let slice = bytes.get_mut(offset..offset + 8).ok_or(Error::Overflow)?;
    BigEndian::write_f64(slice, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_integers() {
        let mut buf = [0_u8; 8];
        write_u16(&mut buf, 0, 0xABCD).unwrap();
        assert_eq!(read_u16(&buf, 0).unwrap(), 0xABCD);
        write_u32(&mut buf, 0, 0x1234_5678).unwrap();
        assert_eq!(read_u32(&buf, 0).unwrap(), 0x1234_5678);
        write_u64(&mut buf, 0, 0x0102_0304_0506_0708).unwrap();
        assert_eq!(read_u64(&buf, 0).unwrap(), 0x0102_0304_0506_0708);
    }

    #[test]
    fn round_trip_floats() {
        let mut buf = [0_u8; 8];
        write_f32(&mut buf, 0, 1.5).unwrap();
        assert_eq!(read_f32(&buf, 0).unwrap(), 1.5);
        write_f64(&mut buf, 0, -2.25).unwrap();
        assert_eq!(read_f64(&buf, 0).unwrap(), -2.25);
    }

    #[test]
    fn truncated_reads_fail() {
        let buf = [0_u8; 1];
        assert!(matches!(read_u16(&buf, 0), Err(Error::Truncated)));
        assert!(matches!(read_u32(&buf, 0), Err(Error::Truncated)));
    }

    #[test]
    fn overflow_writes_fail() {
        let mut buf = [0_u8; 1];
        assert!(matches!(write_u16(&mut buf, 0, 1), Err(Error::Overflow)));
    }

    #[test]
    fn crc_is_stable_and_sensitive() {
        let a = crc16(b"hello world");
        let b = crc16(b"hello world");
        let c = crc16(b"hello worlD");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn crc_of_empty_is_the_initial_value() {
        // CRC-16/CCITT-FALSE of an empty message is its init value, 0xFFFF.
        assert_eq!(crc16(b""), 0xFFFF);
    }
}
