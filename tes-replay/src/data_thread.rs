//! The common remote-control surface both [`crate::network_thread::NetworkThread`]
//! and [`crate::stream_thread::StreamThread`] expose to whatever owns them
//! (a UI, a CLI, a test harness).

use std::sync::Arc;
use tes_core::scene::Scene;

/// Operations shared by a live network connection and a file-replay
/// stream. `StreamThread` supports all of these meaningfully; most are
/// no-ops on `NetworkThread` since a live connection has no timeline to
/// seek or pause.
pub trait DataThread {
    /// The scene this thread is applying packets to.
    fn scene(&self) -> &Arc<Scene>;

    /// `false` for file replay, `true` for a live network connection.
    fn is_live_stream(&self) -> bool;

    /// Requests playback advance to (or stop at) `frame`; `0` clears any
    /// pending target. A no-op on a live connection.
    fn set_target_frame(&self, frame: u32);

    /// The most recently requested target frame, or `0` if none.
    fn target_frame(&self) -> u32;

    /// The frame currently applied to the scene.
    fn current_frame(&self) -> u32 {
        self.scene().current_frame()
    }

    /// The total frame count, if known (from a `FRAME_COUNT` control
    /// message); `0` if not yet known.
    fn total_frames(&self) -> u32 {
        self.scene().total_frames()
    }

    /// Requests the thread stop and its background loop exit. Does not
    /// block; join the thread handle to wait for exit.
    fn stop(&self);

    #[must_use]
    fn is_stopping(&self) -> bool;
}
