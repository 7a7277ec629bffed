//! Typed payloads carried inside packets: the `SERVER_INFO` handshake, the
//! `CONTROL` sub-messages, and the shared create/update/destroy/data
//! headers that every shape-ish handler builds its own payload on top of.

use crate::codec;
use crate::error::{Error, Result};
use crate::id::Id;

/// Coordinate handedness and up-axis convention a server declares at
/// connect time; scene geometry is interpreted relative to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CoordinateFrame {
    XYZ = 0,
    XZY = 1,
    YXZ = 2,
    YZX = 3,
    ZXY = 4,
    ZYX = 5,
    XYZNeg = 6,
    XZYNeg = 7,
    YXZNeg = 8,
    YZXNeg = 9,
    ZXYNeg = 10,
    ZYXNeg = 11,
}

impl CoordinateFrame {
    pub fn from_wire(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::XYZ,
            1 => Self::XZY,
            2 => Self::YXZ,
            3 => Self::YZX,
            4 => Self::ZXY,
            5 => Self::ZYX,
            6 => Self::XYZNeg,
            7 => Self::XZYNeg,
            8 => Self::YXZNeg,
            9 => Self::YZXNeg,
            10 => Self::ZXYNeg,
            11 => Self::ZYXNeg,
            _ => return Err(Error::Truncated),
        })
    }
}

/// The handshake payload sent once, immediately after a connection is
/// established, as the `SERVER_INFO` routed packet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServerInfo {
    pub coordinate_frame: CoordinateFrame,
    /// Microseconds per simulation time unit; a `FRAME` control message's
    /// `value32` multiplies this to get the frame's elapsed time.
    pub time_unit_us: u32,
    /// Default elapsed time (in time units) between frames when a `FRAME`
    /// message's `value32` is zero.
    pub default_frame_time: u32,
    /// Number of bits of `routing_id` reserved to flag a type as a mesh
    /// resource rather than a renderable shape; `0` when unused.
    pub reserved: u8,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            coordinate_frame: CoordinateFrame::XYZ,
            time_unit_us: 1_000,
            default_frame_time: 33,
            reserved: 0,
        }
    }
}

impl ServerInfo {
    pub const WIRE_SIZE: usize = 1 + 4 + 4 + 1;

    pub fn read(bytes: &[u8]) -> Result<Self> {
        Ok(Self {
            coordinate_frame: CoordinateFrame::from_wire(codec::read_u8(bytes, 0)?)?,
            time_unit_us: codec::read_u32(bytes, 1)?,
            default_frame_time: codec::read_u32(bytes, 5)?,
            reserved: codec::read_u8(bytes, 9)?,
        })
    }

    pub fn write(&self, bytes: &mut [u8]) -> Result<()> {
        codec::write_u8(bytes, 0, self.coordinate_frame as u8)?;
        codec::write_u32(bytes, 1, self.time_unit_us)?;
        codec::write_u32(bytes, 5, self.default_frame_time)?;
        codec::write_u8(bytes, 9, self.reserved)?;
        Ok(())
    }
}

/// A decoded `CONTROL`-routed message, keyed by [`control_id`](crate::packet::control_id).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlMessage {
    /// Advances the simulated frame. `value32` is the elapsed time in time
    /// units, or `0` to use `ServerInfo::default_frame_time`.
    Frame { value32: u32, flags: u32 },
    CoordinateFrame { frame: CoordinateFrame },
    FrameCount { value32: u32 },
    ForceFrameFlush,
    /// Resets every handler and sets the current frame counter to `value32`.
    Reset { value32: u32 },
    Keyframe { value32: u32 },
    End,
}

impl ControlMessage {
    /// Decodes the fixed 8-byte control body (`value32`, `value64` packed
    /// as two u32s) for `message_id`.
    pub fn read(message_id: u16, bytes: &[u8]) -> Result<Self> {
        use crate::packet::control_id;
        let value32 = codec::read_u32(bytes, 0).unwrap_or(0);
        Ok(match message_id {
            control_id::FRAME => Self::Frame {
                value32,
                flags: codec::read_u32(bytes, 4).unwrap_or(0),
            },
            control_id::COORDINATE_FRAME => Self::CoordinateFrame {
                frame: CoordinateFrame::from_wire(value32 as u8)?,
            },
            control_id::FRAME_COUNT => Self::FrameCount { value32 },
            control_id::FORCE_FRAME_FLUSH => Self::ForceFrameFlush,
            control_id::RESET => Self::Reset { value32 },
            control_id::KEYFRAME => Self::Keyframe { value32 },
            control_id::END => Self::End,
            _ => return Err(Error::Truncated),
        })
    }
}

/// Shared header fields that precede the type-specific body of a
/// create/update/destroy message for an addressable (non-transient) shape
/// or resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    pub id: Id,
    /// Flags whose meaning is specific to the handler (wireframe, two
    /// sided, etc.); carried opaquely by the core protocol layer.
    pub flags: u16,
}

impl ObjectHeader {
    pub const WIRE_SIZE: usize = 4 + 2 + 2;

    pub fn read(bytes: &[u8]) -> Result<Self> {
        let numeric_id = codec::read_u32(bytes, 0)?;
        let category = codec::read_u16(bytes, 4)?;
        let flags = codec::read_u16(bytes, 6)?;
        Ok(Self {
            id: Id::new(numeric_id, category),
            flags,
        })
    }

    pub fn write(&self, bytes: &mut [u8]) -> Result<()> {
        codec::write_u32(bytes, 0, self.id.numeric_id())?;
        codec::write_u16(bytes, 4, self.id.category())?;
        codec::write_u16(bytes, 6, self.flags)?;
        Ok(())
    }
}

/// Header shared by every `DATA` message: identifies the owning object and
/// where, within its component stream, the attached [`crate::data_buffer::DataBuffer`]
/// payload starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataMessageHeader {
    pub id: Id,
    pub offset: u32,
}

impl DataMessageHeader {
    pub const WIRE_SIZE: usize = 4 + 2 + 4;

    pub fn read(bytes: &[u8]) -> Result<Self> {
        let numeric_id = codec::read_u32(bytes, 0)?;
        let category = codec::read_u16(bytes, 4)?;
        let offset = codec::read_u32(bytes, 6)?;
        Ok(Self {
            id: Id::new(numeric_id, category),
            offset,
        })
    }

    pub fn write(&self, bytes: &mut [u8]) -> Result<()> {
        codec::write_u32(bytes, 0, self.id.numeric_id())?;
        codec::write_u16(bytes, 4, self.id.category())?;
        codec::write_u32(bytes, 6, self.offset)?;
        Ok(())
    }
}
