//! Drives a [`tes_core::scene::Scene`] from either a live network
//! connection or a recorded file, and records a live connection to a file
//! for later replay.
//!
//! This crate owns every background thread and every piece of I/O; it has
//! no notion of rendering beyond what [`DataThread::scene`] exposes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod data_thread;
pub mod error;
pub mod keyframe_store;
pub mod network_thread;
pub mod recorder;
pub mod stream_thread;

pub use data_thread::DataThread;
pub use error::{Error, Result};
pub use keyframe_store::{Keyframe, KeyframeStore};
pub use network_thread::NetworkThread;
pub use recorder::Recorder;
pub use stream_thread::StreamThread;
