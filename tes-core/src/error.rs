use std::fmt;

/// Errors produced while decoding or encoding the wire protocol, or while
/// mutating scene state.
#[derive(Debug)]
pub enum Error {
    /// Fewer bytes remained than the operation required.
    Truncated,
    /// Writing the requested data would exceed the destination's capacity.
    Overflow,
    /// The 4-byte marker at the expected position did not match.
    BadMarker,
    /// The CRC trailer did not match the computed checksum.
    CrcMismatch,
    /// `payload_size` (or a derived total size) does not fit a `u16`.
    PayloadTooLarge,
    /// A collated packet's inner marker was corrupt; iteration stopped.
    CollatedTruncated,
    /// `DataBuffer::read` found a wire `component_count` that does not match
    /// the buffer's own `component_count`.
    ComponentCountMismatch,
    /// A caller asked to `get` a quantised type out of a `DataBuffer`, which
    /// only ever stores decoded floats.
    QuantisedReadRequested,
    /// A write was attempted against a borrowed (read-only) buffer that
    /// would have required reallocation.
    BufferNotOwned,
    /// `KeyframeStore::add` was called with a frame/offset that does not
    /// strictly increase on the previous entry.
    KeyframeOutOfOrder,
    /// A snapshot was requested while another was already pending.
    SnapshotAlreadyPending,
    /// An I/O operation failed; the inner `anyhow::Error` carries the cause.
    Io(anyhow::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "fewer bytes remained than requested"),
            Self::Overflow => write!(f, "write would exceed destination capacity"),
            Self::BadMarker => write!(f, "packet marker mismatch"),
            Self::CrcMismatch => write!(f, "packet CRC mismatch"),
            Self::PayloadTooLarge => write!(f, "payload size exceeds u16::MAX"),
            Self::CollatedTruncated => write!(f, "collated packet inner marker corrupt"),
            Self::ComponentCountMismatch => {
                write!(f, "wire component_count does not match buffer layout")
            }
            Self::QuantisedReadRequested => {
                write!(f, "cannot get() a quantised type from a DataBuffer")
            }
            Self::BufferNotOwned => write!(f, "cannot resize a borrowed DataBuffer"),
            Self::KeyframeOutOfOrder => {
                write!(f, "keyframe frame_number/stream_offset did not increase")
            }
            Self::SnapshotAlreadyPending => write!(f, "a snapshot request is already pending"),
            Self::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.into())
    }
}
