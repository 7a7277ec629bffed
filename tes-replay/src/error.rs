use std::fmt;

/// Errors specific to running a live or file-replay data thread; wire and
/// scene-state errors are [`tes_core::Error`] and wrapped in [`Self::Core`].
#[derive(Debug)]
pub enum Error {
    /// A wire/scene-state error from `tes-core`.
    Core(tes_core::Error),
    /// The connection attempt or read/write failed.
    Io(std::io::Error),
    /// A keyframe was added with a `frame_number` or `stream_offset` that
    /// did not strictly increase on the previous entry.
    KeyframeOutOfOrder,
    /// A snapshot was requested of a [`crate::recorder::Recorder`] that
    /// already has one pending.
    SnapshotAlreadyPending,
    /// An operation required an open recording, but none was active.
    NotRecording,
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Core(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "io error: {err}"),
            Self::KeyframeOutOfOrder => {
                write!(f, "keyframe frame_number/stream_offset did not increase")
            }
            Self::SnapshotAlreadyPending => write!(f, "a snapshot request is already pending"),
            Self::NotRecording => write!(f, "no recording is currently open"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Core(err) => Some(err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<tes_core::Error> for Error {
    fn from(err: tes_core::Error) -> Self {
        Self::Core(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
