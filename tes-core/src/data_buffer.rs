//! A typed, possibly-quantised array of primitive values, as carried by
//! `DATA` messages (vertex positions, indices, colours, normals, ...).
//!
//! The original affordance-table/virtual-dispatch design collapses here
//! into a single enum over the eight integer widths and `f32`/`f64`; each
//! variant owns or borrows its elements via [`Storage`].

use crate::error::{Error, Result};

/// Wire-level tag identifying a [`DataBuffer`]'s element type, independent
/// of whether the values are packed/quantised on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DataStreamType {
    Int8 = 0,
    UInt8 = 1,
    Int16 = 2,
    UInt16 = 3,
    Int32 = 4,
    UInt32 = 5,
    Int64 = 6,
    UInt64 = 7,
    Float32 = 8,
    Float64 = 9,
    /// A `Float32` packed as a quantised `Int16` relative to an origin and
    /// a per-component unit step.
    PackedFloat16 = 10,
    /// A `Float64` packed as a quantised `Int32` relative to an origin and
    /// a per-component unit step.
    PackedFloat32 = 11,
}

impl DataStreamType {
    #[must_use]
    pub const fn is_packed(self) -> bool {
        matches!(self, Self::PackedFloat16 | Self::PackedFloat32)
    }

    /// Size in bytes of a single raw scalar as it appears on the wire for
    /// this type (the packed types store `i16`/`i32`, not the float they
    /// decode to).
    #[must_use]
    pub const fn wire_scalar_size(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 | Self::PackedFloat16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 | Self::PackedFloat32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    pub fn from_wire(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Int8,
            1 => Self::UInt8,
            2 => Self::Int16,
            3 => Self::UInt16,
            4 => Self::Int32,
            5 => Self::UInt32,
            6 => Self::Int64,
            7 => Self::UInt64,
            8 => Self::Float32,
            9 => Self::Float64,
            10 => Self::PackedFloat16,
            11 => Self::PackedFloat32,
            _ => return Err(Error::Truncated),
        })
    }
}

/// Backing storage for a [`DataBuffer`] variant: either owned (read-write,
/// resizable) or borrowed from a caller-provided slice (read-only view,
/// used when handing out buffer contents without a copy).
#[derive(Debug)]
pub enum Storage<'a, T> {
    Owned(Vec<T>),
    Borrowed(&'a [T]),
}

impl<'a, T: Copy> Storage<'a, T> {
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        match self {
            Self::Owned(v) => v,
            Self::Borrowed(s) => s,
        }
    }

    pub fn to_mut_vec(&mut self) -> Result<&mut Vec<T>> {
        match self {
            Self::Owned(v) => Ok(v),
            Self::Borrowed(_) => Err(Error::BufferNotOwned),
        }
    }
}

macro_rules! data_buffer_enum {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        /// A typed array of elements, strided and quantised as declared at
        /// construction time. Quantised variants always store already
        /// decoded floats; you cannot `get` a quantised type back out, only
        /// the float it decodes to.
        #[derive(Debug)]
        pub enum DataBuffer<'a> {
            $($variant { data: Storage<'a, $ty>, component_count: u8 }),*
        }

        $(impl<'a> From<Vec<$ty>> for DataBuffer<'a> {
            fn from(values: Vec<$ty>) -> Self {
                DataBuffer::$variant { data: Storage::Owned(values), component_count: 1 }
            }
        })*

        impl<'a> DataBuffer<'a> {
            /// Number of components per logical element (e.g. 3 for a
            /// `Vector3` stream).
            #[must_use]
            pub fn component_count(&self) -> u8 {
                match self {
                    $(Self::$variant { component_count, .. } => *component_count),*
                }
            }

            /// Number of logical elements (not raw scalars).
            #[must_use]
            pub fn len(&self) -> usize {
                let raw = match self {
                    $(Self::$variant { data, .. } => data.as_slice().len()),*
                };
                raw / self.component_count().max(1) as usize
            }

            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }

            /// The wire type tag this buffer would be encoded as (the
            /// packed forms are only ever produced by [`Self::write`],
            /// never stored as a buffer's resident type).
            #[must_use]
            pub fn stream_type(&self) -> DataStreamType {
                match self {
                    Self::Int8 { .. } => DataStreamType::Int8,
                    Self::UInt8 { .. } => DataStreamType::UInt8,
                    Self::Int16 { .. } => DataStreamType::Int16,
                    Self::UInt16 { .. } => DataStreamType::UInt16,
                    Self::Int32 { .. } => DataStreamType::Int32,
                    Self::UInt32 { .. } => DataStreamType::UInt32,
                    Self::Int64 { .. } => DataStreamType::Int64,
                    Self::UInt64 { .. } => DataStreamType::UInt64,
                    Self::Float32 { .. } => DataStreamType::Float32,
                    Self::Float64 { .. } => DataStreamType::Float64,
                }
            }

            /// Fetches the flattened (component-major) scalar at `index`
            /// widened/narrowed to `f64`, regardless of the buffer's
            /// native element type. Used as the common pivot type by
            /// [`Self::write`] when encoding to a different wire type.
            #[must_use]
            pub fn scalar_as_f64(&self, index: usize) -> f64 {
                match self {
                    $(Self::$variant { data, .. } => data.as_slice()[index].to_f64()),*
                }
            }
        }
    };
}

data_buffer_enum! {
    Int8(i8),
    UInt8(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
}

/// Widens (or, for the 64-bit integer types, lossily narrows) any of this
/// buffer's element types to `f64`, used as the common pivot type when
/// [`DataBuffer::write`] re-encodes to a different wire type than the one
/// the buffer natively stores.
trait ToF64 {
    fn to_f64(self) -> f64;
}

macro_rules! impl_to_f64_widening {
    ($($ty:ty),*) => {
        $(impl ToF64 for $ty {
            fn to_f64(self) -> f64 {
                f64::from(self)
            }
        })*
    };
}
impl_to_f64_widening!(i8, u8, i16, u16, i32, u32, f32, f64);

macro_rules! impl_to_f64_narrowing {
    ($($ty:ty),*) => {
        $(impl ToF64 for $ty {
            fn to_f64(self) -> f64 {
                self as f64
            }
        })*
    };
}
impl_to_f64_narrowing!(i64, u64);

/// Parameters used to decode/encode `PackedFloat16`/`PackedFloat32`
/// component streams: `value = origin[c] + raw[c] * unit`. Carried inline
/// in the wire payload of a packed `DATA` message, immediately after the
/// common header.
#[derive(Debug, Clone, Copy)]
pub struct Quantisation {
    pub origin: [f64; 3],
    pub unit: f64,
}

impl Default for Quantisation {
    fn default() -> Self {
        Self {
            origin: [0.0; 3],
            unit: 1.0,
        }
    }
}

impl Quantisation {
    const WIRE_SIZE: usize = 3 * 8 + 8;

    fn read(bytes: &[u8], offset: usize) -> Result<Self> {
        use crate::codec;
        let mut origin = [0.0_f64; 3];
        for (axis, slot) in origin.iter_mut().enumerate() {
            *slot = codec::read_f64(bytes, offset + axis * 8)?;
        }
        let unit = codec::read_f64(bytes, offset + 24)?;
        Ok(Self { origin, unit })
    }

    fn write(&self, bytes: &mut [u8], offset: usize) -> Result<()> {
        use crate::codec;
        for (axis, value) in self.origin.iter().enumerate() {
            codec::write_f64(bytes, offset + axis * 8, *value)?;
        }
        codec::write_f64(bytes, offset + 24, self.unit)
    }

    #[must_use]
    pub fn decode_component(&self, axis: usize, raw: i32) -> f64 {
        self.origin[axis % 3] + f64::from(raw) * self.unit
    }

    #[must_use]
    pub fn encode_component(&self, axis: usize, value: f64) -> i32 {
        ((value - self.origin[axis % 3]) / self.unit).round() as i32
    }
}

/// Size in bytes of the header common to every `DATA` message body:
/// `offset:u32, count:u16, component_count:u8, type:u8`.
pub const HEADER_SIZE: usize = 4 + 2 + 1 + 1;

impl<'a> DataBuffer<'a> {
    /// Reads a wire `DATA` message payload body into a freshly owned
    /// buffer, returning `(element_offset, buffer)`.
    ///
    /// `element_offset` is the index, in the logical element stream this
    /// buffer is part of, that this message's first element occupies —
    /// a single resource is typically built up from several `DATA`
    /// messages, each covering a different offset range, and the caller
    /// (e.g. [`crate::mesh_resource`]) is responsible for merging them.
    ///
    /// `expected_component_count`, when `Some`, is checked against the
    /// wire value and rejected with [`Error::ComponentCountMismatch`] on
    /// mismatch; pass `None` to accept whatever the wire declares.
    pub fn read(bytes: &[u8], expected_component_count: Option<u8>) -> Result<(u32, Self)> {
        use crate::codec;
        let element_offset = codec::read_u32(bytes, 0)?;
        let count = codec::read_u16(bytes, 4)? as usize;
        let component_count = codec::read_u8(bytes, 6)?;
        let stream_type = DataStreamType::from_wire(codec::read_u8(bytes, 7)?)?;
        if let Some(expected) = expected_component_count {
            if expected != component_count {
                return Err(Error::ComponentCountMismatch);
            }
        }

        let mut offset = HEADER_SIZE;
        let total = count * component_count as usize;

        let quantisation = if stream_type.is_packed() {
            let q = Quantisation::read(bytes, offset)?;
            offset += Quantisation::WIRE_SIZE;
            q
        } else {
            Quantisation::default()
        };

        macro_rules! read_plain {
            ($read:path, $size:expr) => {{
                let mut values = Vec::with_capacity(total);
                for _ in 0..total {
                    values.push($read(bytes, offset)?);
                    offset += $size;
                }
                values
            }};
        }

        let buffer = match stream_type {
            DataStreamType::Int8 => {
                let vals: Vec<i8> = read_plain!(codec::read_u8, 1)
                    .into_iter()
                    .map(|v: u8| v as i8)
                    .collect();
                Self::Int8 {
                    data: Storage::Owned(vals),
                    component_count,
                }
            }
            DataStreamType::UInt8 => Self::UInt8 {
                data: Storage::Owned(read_plain!(codec::read_u8, 1)),
                component_count,
            },
            DataStreamType::Int16 => {
                let vals: Vec<i16> = read_plain!(codec::read_u16, 2)
                    .into_iter()
                    .map(|v: u16| v as i16)
                    .collect();
                Self::Int16 {
                    data: Storage::Owned(vals),
                    component_count,
                }
            }
            DataStreamType::UInt16 => Self::UInt16 {
                data: Storage::Owned(read_plain!(codec::read_u16, 2)),
                component_count,
            },
            DataStreamType::Int32 => {
                let vals: Vec<i32> = read_plain!(codec::read_u32, 4)
                    .into_iter()
                    .map(|v: u32| v as i32)
                    .collect();
                Self::Int32 {
                    data: Storage::Owned(vals),
                    component_count,
                }
            }
            DataStreamType::UInt32 => Self::UInt32 {
                data: Storage::Owned(read_plain!(codec::read_u32, 4)),
                component_count,
            },
            DataStreamType::Int64 => {
                let vals: Vec<i64> = read_plain!(codec::read_u64, 8)
                    .into_iter()
                    .map(|v: u64| v as i64)
                    .collect();
                Self::Int64 {
                    data: Storage::Owned(vals),
                    component_count,
                }
            }
            DataStreamType::UInt64 => Self::UInt64 {
                data: Storage::Owned(read_plain!(codec::read_u64, 8)),
                component_count,
            },
            DataStreamType::Float32 => Self::Float32 {
                data: Storage::Owned(read_plain!(codec::read_f32, 4)),
                component_count,
            },
            DataStreamType::Float64 => Self::Float64 {
                data: Storage::Owned(read_plain!(codec::read_f64, 8)),
                component_count,
            },
            DataStreamType::PackedFloat16 => {
                let mut values = Vec::with_capacity(total);
                for i in 0..total {
                    let raw = codec::read_u16(bytes, offset)? as i16 as i32;
                    offset += 2;
                    values.push(quantisation.decode_component(i % component_count as usize, raw) as f32);
                }
                Self::Float32 {
                    data: Storage::Owned(values),
                    component_count,
                }
            }
            DataStreamType::PackedFloat32 => {
                let mut values = Vec::with_capacity(total);
                for i in 0..total {
                    let raw = codec::read_u32(bytes, offset)? as i32;
                    offset += 4;
                    values.push(quantisation.decode_component(i % component_count as usize, raw));
                }
                Self::Float64 {
                    data: Storage::Owned(values),
                    component_count,
                }
            }
        };

        Ok((element_offset, buffer))
    }

    /// Encodes a `DATA` message payload body carrying as many elements as
    /// fit within `byte_limit`, starting at logical element
    /// `element_offset`. Returns the encoded bytes and the number of
    /// elements actually written (which may be less than
    /// `self.len() - element_offset` if the limit was reached).
    ///
    /// `quantisation` is only consulted (and only written to the wire)
    /// when `as_type` is one of the packed types; callers writing a plain
    /// type can pass [`Quantisation::default`].
    ///
    /// # Errors
    /// Returns [`Error::Truncated`] if `element_offset` is beyond the end
    /// of the buffer.
    pub fn write(
        &self,
        as_type: DataStreamType,
        element_offset: u32,
        quantisation: Quantisation,
        byte_limit: usize,
    ) -> Result<(Vec<u8>, u32)> {
        let component_count = self.component_count();
        let total_elements = self.len();
        if element_offset as usize > total_elements {
            return Err(Error::Truncated);
        }

        let quant_size = if as_type.is_packed() { Quantisation::WIRE_SIZE } else { 0 };
        let scalar_size = as_type.wire_scalar_size();
        let per_element_bytes = scalar_size * component_count as usize;
        let available = byte_limit.saturating_sub(HEADER_SIZE + quant_size);
        let max_elements = if per_element_bytes == 0 {
            0
        } else {
            available / per_element_bytes
        };
        let remaining = total_elements - element_offset as usize;
        let elements_to_write = max_elements.min(remaining) as u32;

        let body_len =
            HEADER_SIZE + quant_size + elements_to_write as usize * per_element_bytes;
        let mut bytes = vec![0_u8; body_len];
        {
            use crate::codec;
            codec::write_u32(&mut bytes, 0, element_offset)?;
            codec::write_u16(&mut bytes, 4, u16::try_from(elements_to_write).unwrap_or(u16::MAX))?;
            codec::write_u8(&mut bytes, 6, component_count)?;
            codec::write_u8(&mut bytes, 7, as_type as u8)?;
        }
        let mut offset = HEADER_SIZE;
        if as_type.is_packed() {
            quantisation.write(&mut bytes, offset)?;
            offset += Quantisation::WIRE_SIZE;
        }

        let start = element_offset as usize * component_count as usize;
        let scalar_count = elements_to_write as usize * component_count as usize;
        for i in 0..scalar_count {
            let flat_index = start + i;
            let value = self.scalar_as_f64(flat_index);
            self.write_scalar(&mut bytes, offset, as_type, i % component_count as usize, value, &quantisation)?;
            offset += scalar_size;
        }

        Ok((bytes, elements_to_write))
    }

    #[allow(clippy::too_many_arguments)]
    fn write_scalar(
        &self,
        bytes: &mut [u8],
        offset: usize,
        as_type: DataStreamType,
        axis: usize,
        value: f64,
        quantisation: &Quantisation,
    ) -> Result<()> {
        use crate::codec;
        match as_type {
            DataStreamType::Int8 => codec::write_u8(bytes, offset, value as i8 as u8),
            DataStreamType::UInt8 => codec::write_u8(bytes, offset, value as u8),
            DataStreamType::Int16 => codec::write_u16(bytes, offset, value as i16 as u16),
            DataStreamType::UInt16 => codec::write_u16(bytes, offset, value as u16),
            DataStreamType::Int32 => codec::write_u32(bytes, offset, value as i32 as u32),
            DataStreamType::UInt32 => codec::write_u32(bytes, offset, value as u32),
            DataStreamType::Int64 => codec::write_u64(bytes, offset, value as i64 as u64),
            DataStreamType::UInt64 => codec::write_u64(bytes, offset, value as u64),
            DataStreamType::Float32 => codec::write_f32(bytes, offset, value as f32),
            DataStreamType::Float64 => codec::write_f64(bytes, offset, value),
            DataStreamType::PackedFloat16 => {
                let raw = quantisation.encode_component(axis, value);
                codec::write_u16(bytes, offset, raw as i16 as u16)
            }
            DataStreamType::PackedFloat32 => {
                let raw = quantisation.encode_component(axis, value);
                codec::write_u32(bytes, offset, raw as u32)
            }
        }
    }

    /// Attempts to fetch the scalar at `index` (into the flattened,
    /// component-major array) as `i32`, failing for float-only buffers.
    pub fn get_i32(&self, index: usize) -> Result<i32> {
        match self {
            Self::Int8 { data, .. } => Ok(i32::from(data.as_slice()[index])),
            Self::UInt8 { data, .. } => Ok(i32::from(data.as_slice()[index])),
            Self::Int16 { data, .. } => Ok(i32::from(data.as_slice()[index])),
            Self::UInt16 { data, .. } => Ok(i32::from(data.as_slice()[index])),
            Self::Int32 { data, .. } => Ok(data.as_slice()[index]),
            Self::UInt32 { data, .. } => Ok(data.as_slice()[index] as i32),
            _ => Err(Error::QuantisedReadRequested),
        }
    }

    pub fn get_f64(&self, index: usize) -> Result<f64> {
        match self {
            Self::Float32 { data, .. } => Ok(f64::from(data.as_slice()[index])),
            Self::Float64 { data, .. } => Ok(data.as_slice()[index]),
            _ => Err(Error::QuantisedReadRequested),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_plain_u16(element_offset: u32, component_count: u8, values: &[u16]) -> Vec<u8> {
        let mut bytes = vec![0_u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&element_offset.to_be_bytes());
        let count = (values.len() as u16) / u16::from(component_count);
        bytes[4..6].copy_from_slice(&count.to_be_bytes());
        bytes[6] = component_count;
        bytes[7] = DataStreamType::UInt16 as u8;
        for v in values {
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        bytes
    }

    #[test]
    fn reads_plain_uint16_stream() {
        let bytes = encode_plain_u16(0, 2, &[1, 2, 3, 4]);
        let (offset, buffer) = DataBuffer::read(&bytes, Some(2)).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(buffer.component_count(), 2);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.get_i32(0).unwrap(), 1);
        assert_eq!(buffer.get_i32(3).unwrap(), 4);
    }

    #[test]
    fn element_offset_round_trips() {
        let bytes = encode_plain_u16(7, 1, &[42]);
        let (offset, buffer) = DataBuffer::read(&bytes, Some(1)).unwrap();
        assert_eq!(offset, 7);
        assert_eq!(buffer.get_i32(0).unwrap(), 42);
    }

    #[test]
    fn component_count_mismatch_rejected() {
        let bytes = encode_plain_u16(0, 2, &[1, 2]);
        let err = DataBuffer::read(&bytes, Some(3)).unwrap_err();
        assert!(matches!(err, Error::ComponentCountMismatch));
    }

    #[test]
    fn packed_float16_decodes_with_quantisation() {
        let origin = [10.0, 0.0, 0.0];
        let unit = 0.5;
        let mut bytes = vec![0_u8; HEADER_SIZE];
        bytes[4..6].copy_from_slice(&1_u16.to_be_bytes());
        bytes[6] = 1;
        bytes[7] = DataStreamType::PackedFloat16 as u8;
        let quant = Quantisation { origin, unit };
        let mut quant_bytes = vec![0_u8; Quantisation::WIRE_SIZE];
        quant.write(&mut quant_bytes, 0).unwrap();
        bytes.extend_from_slice(&quant_bytes);
        bytes.extend_from_slice(&4_i16.to_be_bytes()); // raw=4 -> 10 + 4*0.5 = 12

        let (_, buffer) = DataBuffer::read(&bytes, Some(1)).unwrap();
        assert!((buffer.get_f64(0).unwrap() - 12.0).abs() < 1e-6);
    }

    #[test]
    fn quantised_get_i32_rejected() {
        let bytes = encode_plain_u16(0, 1, &[5]);
        let (_, buffer) = DataBuffer::read(&bytes, Some(1)).unwrap();
        // UInt16 decodes fine as i32...
        assert_eq!(buffer.get_i32(0).unwrap(), 5);
        // ...but asking a float buffer for an integer view fails.
        assert!(matches!(buffer.get_f64(0), Err(Error::QuantisedReadRequested)));
    }

    #[test]
    fn borrowed_storage_cannot_be_resized() {
        let backing = [1_u16, 2, 3];
        let mut storage: Storage<'_, u16> = Storage::Borrowed(&backing);
        assert!(matches!(storage.to_mut_vec(), Err(Error::BufferNotOwned)));
    }

    #[test]
    fn write_then_read_plain_round_trips() {
        let buffer: DataBuffer<'_> = DataBuffer::from(vec![1.0_f32, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let (bytes, written) = buffer
            .write(DataStreamType::Float32, 0, Quantisation::default(), 4096)
            .unwrap();
        assert_eq!(written, 6);
        let (offset, decoded) = DataBuffer::read(&bytes, Some(1)).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(decoded.len(), 6);
        assert!((decoded.get_f64(2).unwrap() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn write_then_read_packed_float32_round_trips_within_quantum() {
        let buffer: DataBuffer<'_> = DataBuffer::from(vec![1.0_f64, 2.0, 3.0]);
        let quant = Quantisation {
            origin: [0.0, 0.0, 0.0],
            unit: 0.001,
        };
        let (bytes, written) = buffer
            .write(DataStreamType::PackedFloat32, 0, quant, 4096)
            .unwrap();
        assert_eq!(written, 3);
        let (_, decoded) = DataBuffer::read(&bytes, Some(1)).unwrap();
        for i in 0..3 {
            let original = buffer.get_f64(i).unwrap();
            let round_tripped = decoded.get_f64(i).unwrap();
            assert!((original - round_tripped).abs() <= quant.unit);
        }
    }

    #[test]
    fn write_respects_byte_limit_and_reports_partial_count() {
        let values: Vec<i32> = (0..100).collect();
        let buffer: DataBuffer<'_> = DataBuffer::from(values);
        let (bytes, written) = buffer
            .write(DataStreamType::Int32, 0, Quantisation::default(), HEADER_SIZE + 10 * 4)
            .unwrap();
        assert_eq!(written, 10);
        assert_eq!(bytes.len(), HEADER_SIZE + 10 * 4);
    }
}
