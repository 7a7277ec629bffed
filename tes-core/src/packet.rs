//! Packet framing: the fixed-size [`PacketHeader`] and the borrowed
//! [`PacketView`]/[`PacketWriter`] wrappers used to read and write it
//! against a byte slice.

use crate::codec::{self, crc16};
use crate::error::{Error, Result};

/// Fixed 32-bit sentinel that opens every packet.
pub const MARKER: u32 = 0x_5243_4954; // "TICR" read as a big-endian u32.

/// Current protocol version.
pub const VERSION_MAJOR: u16 = 0;
pub const VERSION_MINOR: u16 = 1;

/// Oldest protocol version this reader still accepts.
pub const COMPATIBILITY_VERSION_MAJOR: u16 = 0;
pub const COMPATIBILITY_VERSION_MINOR: u16 = 0;

/// Byte size of [`PacketHeader`] on the wire.
pub const HEADER_SIZE: usize = 16;
/// Byte size of the optional CRC trailer.
pub const CRC_SIZE: usize = 2;
/// Largest possible packet: header + maximum payload + CRC.
pub const MAX_PACKET_SIZE: usize = HEADER_SIZE + u16::MAX as usize + CRC_SIZE;

/// Routing ids. Numeric assignments are frozen and must not change; see
/// DESIGN.md for where the exact ordinals came from.
pub mod routing_id {
    pub const NULL: u16 = 0;
    pub const SERVER_INFO: u16 = 1;
    pub const CONTROL: u16 = 2;
    pub const COLLATED: u16 = 3;
    pub const MESH: u16 = 4;
    pub const CAMERA: u16 = 5;
    pub const CATEGORY: u16 = 6;
    pub const MATERIAL: u16 = 7;
    pub const SPHERE: u16 = 8;
    pub const BOX: u16 = 9;
    pub const CONE: u16 = 10;
    pub const CYLINDER: u16 = 11;
    pub const CAPSULE: u16 = 12;
    pub const PLANE: u16 = 13;
    pub const STAR: u16 = 14;
    pub const ARROW: u16 = 15;
    pub const MESH_SHAPE: u16 = 16;
    pub const MESH_SET: u16 = 17;
    pub const POINT_CLOUD_DEPRECATED: u16 = 18;
    pub const TEXT_3D: u16 = 19;
    pub const TEXT_2D: u16 = 20;
    pub const POSE: u16 = 21;
}

/// Control message ids, carried in the `message_id` field of a `CONTROL`
/// routed packet.
pub mod control_id {
    pub const NULL: u16 = 0;
    pub const FRAME: u16 = 1;
    pub const COORDINATE_FRAME: u16 = 2;
    pub const FRAME_COUNT: u16 = 3;
    pub const FORCE_FRAME_FLUSH: u16 = 4;
    pub const RESET: u16 = 5;
    pub const KEYFRAME: u16 = 6;
    pub const END: u16 = 7;
}

/// Bits of [`PacketHeader::flags`]. Only one bit is defined today, so this
/// is a thin wrapper rather than a full bitflags type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags(u8);

impl PacketFlags {
    /// No flags set.
    pub const EMPTY: Self = Self(0);
    /// When set, the packet carries no CRC trailer.
    pub const NO_CRC: Self = Self(1 << 0);

    /// Wraps a raw flags byte as-is.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// The raw flags byte.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every bit in `other` is also set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

/// The fixed-size header preceding every packet's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version_major: u16,
    pub version_minor: u16,
    pub routing_id: u16,
    pub message_id: u16,
    pub payload_size: u16,
    pub payload_offset: u8,
    pub flags: PacketFlags,
}

impl PacketHeader {
    /// Builds a header for the current protocol version with sensible
    /// defaults (`payload_offset = 0`, CRC enabled).
    #[must_use]
    pub fn new(routing_id: u16, message_id: u16) -> Self {
        Self {
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            routing_id,
            message_id,
            payload_size: 0,
            payload_offset: 0,
            flags: PacketFlags::EMPTY,
        }
    }

    /// Whether this header requests CRC suppression.
    #[must_use]
    pub fn no_crc(&self) -> bool {
        self.flags.contains(PacketFlags::NO_CRC)
    }

    /// Total encoded size of a packet carrying this header: header, payload
    /// and (unless suppressed) a 2-byte CRC.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        HEADER_SIZE + self.payload_size as usize + if self.no_crc() { 0 } else { CRC_SIZE }
    }

    /// Checks whether `(version_major, version_minor)` falls within
    /// `[(compat_major, compat_minor), (major, minor)]` inclusive.
    #[must_use]
    pub fn is_version_compatible(&self) -> bool {
        let version = (self.version_major, self.version_minor);
        let compat = (COMPATIBILITY_VERSION_MAJOR, COMPATIBILITY_VERSION_MINOR);
        let current = (VERSION_MAJOR, VERSION_MINOR);
        version >= compat && version <= current
    }
}

/// A read-only, borrowed view over a single encoded packet (header plus
/// payload plus optional CRC).
#[derive(Debug, Clone, Copy)]
pub struct PacketView<'a> {
    bytes: &'a [u8],
    header: PacketHeader,
}

impl<'a> PacketView<'a> {
    /// Parses a header out of `bytes` and wraps the whole packet.
    ///
    /// `bytes` must be at least [`HEADER_SIZE`] long; the caller is
    /// expected to have already sized the slice to the packet's total
    /// length (header + payload + optional CRC), as computed from a
    /// previously-parsed header's [`PacketHeader::packet_size`].
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::Truncated);
        }
        let marker = codec::read_u32(bytes, 0)?;
        if marker != MARKER {
            return Err(Error::BadMarker);
        }
        let header = PacketHeader {
            version_major: codec::read_u16(bytes, 4)?,
            version_minor: codec::read_u16(bytes, 6)?,
            routing_id: codec::read_u16(bytes, 8)?,
            message_id: codec::read_u16(bytes, 10)?,
            payload_size: codec::read_u16(bytes, 12)?,
            payload_offset: codec::read_u8(bytes, 14)?,
            flags: PacketFlags::from_bits(codec::read_u8(bytes, 15)?),
        };
        let view = Self { bytes, header };
        if bytes.len() < view.header.packet_size() {
            return Err(Error::Truncated);
        }
        Ok(view)
    }

    /// Validates the CRC trailer against the header and payload. Always
    /// succeeds (trivially) when the no-CRC flag is set.
    pub fn check_crc(&self) -> Result<()> {
        if self.header.no_crc() {
            return Ok(());
        }
        let body_len = HEADER_SIZE + self.header.payload_size as usize;
        let stored = codec::read_u16(self.bytes, body_len)?;
        let computed = crc16(&self.bytes[..body_len]);
        if stored == computed {
            Ok(())
        } else {
            Err(Error::CrcMismatch)
        }
    }

    #[must_use]
    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    #[must_use]
    pub fn routing_id(&self) -> u16 {
        self.header.routing_id
    }

    #[must_use]
    pub fn message_id(&self) -> u16 {
        self.header.message_id
    }

    /// The payload bytes, honouring `payload_offset`.
    #[must_use]
    pub fn payload(&self) -> &'a [u8] {
        let start = HEADER_SIZE + self.header.payload_offset as usize;
        let end = HEADER_SIZE + self.header.payload_size as usize;
        &self.bytes[start..end]
    }

    /// The packet's total encoded length, including any CRC trailer.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.header.packet_size()
    }

    /// The raw bytes of the whole packet (header, payload and CRC).
    #[must_use]
    pub fn as_bytes(&self) -> &'a [u8] {
        &self.bytes[..self.packet_size()]
    }
}

/// A writer that builds a packet into a borrowed, mutable byte slice.
pub struct PacketWriter<'a> {
    bytes: &'a mut [u8],
    payload_len: usize,
    no_crc: bool,
}

impl<'a> PacketWriter<'a> {
    /// Begins writing a packet with the given routing/message id into
    /// `bytes`. The payload is appended with [`Self::write_payload`]; call
    /// [`Self::finish`] to finalise the header and (unless `no_crc`) the
    /// CRC trailer.
    pub fn new(bytes: &'a mut [u8], routing_id: u16, message_id: u16, no_crc: bool) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::Overflow);
        }
        codec::write_u32(bytes, 0, MARKER)?;
        codec::write_u16(bytes, 4, VERSION_MAJOR)?;
        codec::write_u16(bytes, 6, VERSION_MINOR)?;
        codec::write_u16(bytes, 8, routing_id)?;
        codec::write_u16(bytes, 10, message_id)?;
        codec::write_u8(bytes, 14, 0)?;
        let flags = if no_crc {
            PacketFlags::NO_CRC
        } else {
            PacketFlags::EMPTY
        };
        codec::write_u8(bytes, 15, flags.bits())?;
        Ok(Self {
            bytes,
            payload_len: 0,
            no_crc,
        })
    }

    /// Appends `data` to the payload, returning an error if it would not
    /// fit the destination slice or would overflow `u16::MAX`.
    pub fn write_payload(&mut self, data: &[u8]) -> Result<()> {
        let new_len = self.payload_len + data.len();
        if new_len > u16::MAX as usize {
            return Err(Error::PayloadTooLarge);
        }
        let start = HEADER_SIZE + self.payload_len;
        let end = HEADER_SIZE + new_len;
        let dst = self.bytes.get_mut(start..end).ok_or(Error::Overflow)?;
        dst.copy_from_slice(data);
        self.payload_len = new_len;
        Ok(())
    }

    /// The number of payload bytes written so far.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Writes `payload_size`, then (unless suppressed) the CRC trailer, and
    /// returns the packet's total encoded length.
    pub fn finish(mut self) -> Result<usize> {
        let payload_size = u16::try_from(self.payload_len).map_err(|_| Error::PayloadTooLarge)?;
        codec::write_u16(self.bytes, 12, payload_size)?;
        let body_len = HEADER_SIZE + self.payload_len;
        if self.no_crc {
            return Ok(body_len);
        }
        let crc = crc16(&self.bytes[..body_len]);
        codec::write_u16(self.bytes, body_len, crc)?;
        Ok(body_len + CRC_SIZE)
    }
}
