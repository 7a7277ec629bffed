//! The extension point every message-routed subsystem (shapes, categories,
//! mesh resources, ...) implements to participate in the frame lifecycle.

use crate::error::Result;
use crate::messages::ServerInfo;
use crate::packet::PacketView;

/// Identifies a point in the scene's frame timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStamp {
    pub frame_number: u32,
    /// Elapsed simulated time since the previous frame, in time units
    /// (see [`ServerInfo::time_unit_us`]).
    pub elapsed: u32,
}

/// A handler owns all state for one `routing_id` and mutates it only from
/// messages dispatched by [`crate::scene::Scene`]. Handlers are not
/// required to be `Send`/`Sync` on their own; the owning `Scene` provides
/// the single point of mutual exclusion.
pub trait Handler {
    /// The routing id this handler is registered under.
    fn routing_id(&self) -> u16;

    /// A short name used in log messages when dispatch hits this handler.
    fn name(&self) -> &str;

    /// Called once, when the handler is registered or the connection
    /// (re)established, before the first frame.
    fn initialise(&mut self) {}

    /// Discards all accumulated state, returning the handler to its
    /// just-initialised condition. Called on a `RESET` control message and
    /// when loading a snapshot.
    fn reset(&mut self);

    /// Called before the render thread is allowed to read the handler's
    /// state for `stamp`, after the data thread's frame-ending pass has
    /// run. Handlers that stage double-buffered state swap it here.
    fn prepare_frame(&mut self, stamp: FrameStamp) {
        let _ = stamp;
    }

    /// Called by the data thread once a full frame's messages have been
    /// applied, before the frame is handed to the render side.
    fn end_frame(&mut self, stamp: FrameStamp) {
        let _ = stamp;
    }

    /// Applies a single message routed to this handler.
    fn read_message(&mut self, packet: PacketView<'_>) -> Result<()>;

    /// Serialises the handler's entire current state as a sequence of
    /// messages, used both for `Recorder` snapshots and for late-joining
    /// viewers. Each callback invocation should append one or more
    /// complete, independent messages.
    fn serialise(&self, emit: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()>;
}

/// Extra context a handler may need about the connection it is attached
/// to; passed once at `initialise` time rather than through every call.
#[derive(Debug, Clone, Copy)]
pub struct HandlerContext {
    pub server_info: ServerInfo,
}
