//! Owns every registered [`Handler`] and dispatches incoming packets to
//! them under a single mutex, separating the data thread (applying
//! messages) from whatever consumes the resulting state afterwards.

use crate::error::Result;
use crate::handler::{FrameStamp, Handler};
use crate::messages::{ControlMessage, CoordinateFrame, ServerInfo};
use crate::packet::{routing_id, PacketView, PacketWriter, CRC_SIZE, HEADER_SIZE};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Events a dispatched packet can cause the owning data thread to react
/// to (advance frame pacing, start a reconnect, stop the stream, ...).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SceneEvent {
    FrameEnded(FrameStamp),
    Reset,
    CoordinateFrameChanged(CoordinateFrame),
    FrameCountSet(u32),
    End,
}

struct SceneInner {
    handlers: Vec<Box<dyn Handler + Send>>,
    routing_index: HashMap<u16, usize>,
    server_info: ServerInfo,
    /// Routing ids we have already logged a "no handler" warning for, so a
    /// misbehaving stream does not spam the log once per packet.
    unknown_logged: HashSet<u16>,
    reset_in_progress: bool,
    /// A `SERVER_INFO` packet applied by the data thread, not yet drained
    /// into `server_info` by [`Scene::prepare_frame`].
    pending_server_info: Option<ServerInfo>,
    /// The frame staged by the data thread's `FRAME` control message,
    /// waiting for [`Scene::prepare_frame`] to promote it.
    pending_frame: Option<FrameStamp>,
}

/// Holds the entire applied scene state: registered handlers, the current
/// server handshake info, and the frame timeline.
pub struct Scene {
    inner: Mutex<SceneInner>,
    reset_cond: Condvar,
    current_frame: AtomicU32,
    total_frames: AtomicU32,
    quit_flag: AtomicBool,
    paused: AtomicBool,
    catching_up: AtomicBool,
}

impl Scene {
    #[must_use]
    pub fn new(server_info: ServerInfo) -> Self {
        Self {
            inner: Mutex::new(SceneInner {
                handlers: Vec::new(),
                routing_index: HashMap::new(),
                server_info,
                unknown_logged: HashSet::new(),
                reset_in_progress: false,
                pending_server_info: None,
                pending_frame: None,
            }),
            reset_cond: Condvar::new(),
            current_frame: AtomicU32::new(0),
            total_frames: AtomicU32::new(0),
            quit_flag: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            catching_up: AtomicBool::new(false),
        }
    }

    /// Registers a handler for its declared routing id, replacing any
    /// previous handler registered for the same id.
    pub fn register_handler(&self, handler: Box<dyn Handler + Send>) {
        let mut guard = self.inner.lock();
        let id = handler.routing_id();
        let index = guard.handlers.len();
        guard.handlers.push(handler);
        guard.routing_index.insert(id, index);
        guard.unknown_logged.remove(&id);
    }

    #[must_use]
    pub fn current_frame(&self) -> u32 {
        self.current_frame.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn total_frames(&self) -> u32 {
        self.total_frames.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    #[must_use]
    pub fn is_catching_up(&self) -> bool {
        self.catching_up.load(Ordering::Acquire)
    }

    pub fn set_catching_up(&self, catching_up: bool) {
        self.catching_up.store(catching_up, Ordering::Release);
    }

    #[must_use]
    pub fn should_quit(&self) -> bool {
        self.quit_flag.load(Ordering::Acquire)
    }

    pub fn request_quit(&self) {
        self.quit_flag.store(true, Ordering::Release);
    }

    /// Forces the current-frame counter to `frame`, without touching
    /// handler state. Used by a replay thread after it has restored
    /// handler state from a keyframe snapshot or seeked to the stream
    /// start, neither of which goes through [`Self::dispatch`]'s normal
    /// `FRAME` control message counting.
    pub fn set_current_frame(&self, frame: u32) {
        self.current_frame.store(frame, Ordering::Release);
    }

    #[must_use]
    pub fn server_info(&self) -> ServerInfo {
        self.inner.lock().server_info
    }

    /// Applies a single packet: routes `SERVER_INFO`/`CONTROL` internally,
    /// everything else to its registered [`Handler`]. Callers are expected
    /// to have already unwrapped `COLLATED` packets via
    /// [`crate::collated::CollatedPacketDecoder`] before calling this.
    ///
    /// This is the data-thread half of the frame hand-off: a `SERVER_INFO`
    /// packet and a `FRAME` control message are only *staged* here. Nothing
    /// becomes visible to a concurrent reader of [`Self::server_info`] or
    /// [`Self::current_frame`] until a (possibly different) thread calls
    /// [`Self::prepare_frame`].
    pub fn dispatch(&self, packet: PacketView<'_>) -> Result<Option<SceneEvent>> {
        match packet.routing_id() {
            routing_id::SERVER_INFO => {
                let info = ServerInfo::read(packet.payload())?;
                self.inner.lock().pending_server_info = Some(info);
                Ok(None)
            }
            routing_id::CONTROL => self.dispatch_control(packet),
            routing_id::COLLATED => Ok(None),
            id => {
                let mut guard = self.inner.lock();
                if let Some(&index) = guard.routing_index.get(&id) {
                    guard.handlers[index].read_message(packet)?;
                } else if guard.unknown_logged.insert(id) {
                    log::warn!("no handler registered for routing id {id}");
                }
                Ok(None)
            }
        }
    }

    fn dispatch_control(&self, packet: PacketView<'_>) -> Result<Option<SceneEvent>> {
        let message = ControlMessage::read(packet.message_id(), packet.payload())?;
        let event = match message {
            ControlMessage::Frame { value32, .. } => {
                // Only the data-thread half of the hand-off happens here:
                // every handler's `end_frame` runs now, but `current_frame`
                // is not advanced and no handler's `prepare_frame` runs
                // until a (possibly different) thread calls
                // `Scene::prepare_frame`, matching spec.md's two-phase
                // hand-off (end_frame on the data thread, prepare_frame on
                // the render thread, serialised by the same mutex).
                let frame_number = self.current_frame.load(Ordering::Acquire) + 1;
                let stamp = FrameStamp {
                    frame_number,
                    elapsed: value32,
                };
                let mut guard = self.inner.lock();
                for handler in &mut guard.handlers {
                    handler.end_frame(stamp);
                }
                guard.pending_frame = Some(stamp);
                Some(SceneEvent::FrameEnded(stamp))
            }
            ControlMessage::Reset { value32 } => {
                self.reset_blocking_to(value32, || false);
                Some(SceneEvent::Reset)
            }
            ControlMessage::CoordinateFrame { frame } => {
                self.inner.lock().server_info.coordinate_frame = frame;
                Some(SceneEvent::CoordinateFrameChanged(frame))
            }
            ControlMessage::FrameCount { value32 } => {
                self.total_frames.store(value32, Ordering::Release);
                Some(SceneEvent::FrameCountSet(value32))
            }
            ControlMessage::ForceFrameFlush | ControlMessage::Keyframe { .. } => None,
            ControlMessage::End => Some(SceneEvent::End),
        };
        Ok(event)
    }

    /// Resets every handler's state and zeroes the frame timeline.
    ///
    /// Mutual exclusion between concurrent callers (e.g. a `RESET` control
    /// message arriving on the data thread while a foreign thread asked
    /// for a manual clear) is a bounded wait on a condition variable
    /// rather than the mutex itself, so a caller that cannot afford to
    /// block indefinitely can bail out via `should_abort`. Returns `false`
    /// if `should_abort` fired before the reset could proceed.
    pub fn reset_blocking(&self, should_abort: impl FnMut() -> bool) -> bool {
        self.reset_blocking_to(0, should_abort)
    }

    /// As [`Self::reset_blocking`], but leaves the current-frame counter at
    /// `frame` instead of zero — used by the `RESET` control message, whose
    /// `value32` names the frame to resume counting from.
    pub fn reset_blocking_to(&self, frame: u32, mut should_abort: impl FnMut() -> bool) -> bool {
        let mut guard = self.inner.lock();
        while guard.reset_in_progress {
            if should_abort() {
                return false;
            }
            self.reset_cond.wait_for(&mut guard, Duration::from_secs(1));
        }
        guard.reset_in_progress = true;
        for handler in &mut guard.handlers {
            handler.reset();
        }
        guard.unknown_logged.clear();
        guard.pending_frame = None;
        guard.pending_server_info = None;
        guard.reset_in_progress = false;
        drop(guard);

        self.current_frame.store(frame, Ordering::Release);
        self.total_frames.store(0, Ordering::Release);
        self.catching_up.store(false, Ordering::Release);
        self.reset_cond.notify_all();
        true
    }

    /// The render thread's half of the frame hand-off (spec.md §4.7 steps
    /// 1-3): drains any `SERVER_INFO` staged by [`Self::dispatch`] into
    /// [`Self::server_info`], then, if the data thread staged a frame via
    /// a `FRAME` control message, promotes it — calling every handler's
    /// `prepare_frame` and advancing [`Self::current_frame`] — under the
    /// same mutex `dispatch`'s `FRAME` arm uses for `end_frame`, so a
    /// handler never observes a `prepare_frame` call racing an `end_frame`
    /// call for a different frame.
    ///
    /// Callers pace this independently of how often `dispatch` is called;
    /// nothing requires it to run once per `FRAME` message. Returns the
    /// promoted stamp, or `None` if no frame was pending.
    pub fn prepare_frame(&self) -> Option<FrameStamp> {
        let mut guard = self.inner.lock();
        if let Some(info) = guard.pending_server_info.take() {
            guard.server_info = info;
        }
        let stamp = guard.pending_frame.take()?;
        for handler in &mut guard.handlers {
            handler.prepare_frame(stamp);
        }
        drop(guard);
        self.current_frame.store(stamp.frame_number, Ordering::Release);
        Some(stamp)
    }

    /// Serialises the full scene state (server info plus every handler's
    /// contents) as a sequence of complete packets, used both for
    /// `Recorder` snapshots and for replaying a saved keyframe.
    pub fn save_snapshot(&self, emit: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()> {
        let guard = self.inner.lock();
        emit_server_info_packet(&guard.server_info, emit)?;
        for handler in &guard.handlers {
            handler.serialise(emit)?;
        }
        Ok(())
    }
}

fn emit_server_info_packet(info: &ServerInfo, emit: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()> {
    let mut payload = [0_u8; ServerInfo::WIRE_SIZE];
    info.write(&mut payload)?;

    let mut buf = vec![0_u8; HEADER_SIZE + payload.len() + CRC_SIZE];
    let mut writer = PacketWriter::new(&mut buf, routing_id::SERVER_INFO, 0, false)?;
    writer.write_payload(&payload)?;
    let len = writer.finish()?;
    emit(&buf[..len])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::CategoryHandler;
    use crate::packet::control_id;

    fn control_packet(message_id: u16, value32: u32) -> Vec<u8> {
        let mut payload = [0_u8; 8];
        payload[0..4].copy_from_slice(&value32.to_be_bytes());
        let mut buf = vec![0_u8; HEADER_SIZE + payload.len() + CRC_SIZE];
        let mut writer =
            PacketWriter::new(&mut buf, routing_id::CONTROL, message_id, false).unwrap();
        writer.write_payload(&payload).unwrap();
        let len = writer.finish().unwrap();
        buf.truncate(len);
        buf
    }

    #[test]
    fn frame_control_message_stages_a_pending_frame_without_advancing_it() {
        let scene = Scene::new(ServerInfo::default());
        let packet = control_packet(control_id::FRAME, 5);
        let event = scene
            .dispatch(PacketView::parse(&packet).unwrap())
            .unwrap();
        assert!(matches!(event, Some(SceneEvent::FrameEnded(stamp)) if stamp.elapsed == 5));
        // `dispatch` only stages the frame; nothing is visible until the
        // render side calls `prepare_frame`.
        assert_eq!(scene.current_frame(), 0);
    }

    #[test]
    fn prepare_frame_promotes_a_pending_frame() {
        let scene = Scene::new(ServerInfo::default());
        let packet = control_packet(control_id::FRAME, 5);
        scene
            .dispatch(PacketView::parse(&packet).unwrap())
            .unwrap();
        assert_eq!(scene.current_frame(), 0);

        let promoted = scene.prepare_frame();
        assert_eq!(scene.current_frame(), 1);
        assert!(matches!(promoted, Some(stamp) if stamp.frame_number == 1));
        // A second call with nothing newly staged is a no-op.
        assert_eq!(scene.prepare_frame(), None);
        assert_eq!(scene.current_frame(), 1);
    }

    #[test]
    fn reset_control_message_zeroes_frame_and_clears_handlers() {
        let scene = Scene::new(ServerInfo::default());
        scene.register_handler(Box::new(CategoryHandler::new()));
        scene
            .dispatch(PacketView::parse(&control_packet(control_id::FRAME, 1)).unwrap())
            .unwrap();
        scene.prepare_frame();
        assert_eq!(scene.current_frame(), 1);

        let reset_packet = control_packet(control_id::RESET, 0);
        let event = scene
            .dispatch(PacketView::parse(&reset_packet).unwrap())
            .unwrap();
        assert_eq!(scene.current_frame(), 0);
        assert_eq!(event, Some(SceneEvent::Reset));
    }

    #[test]
    fn unregistered_routing_id_is_ignored_not_errored() {
        let scene = Scene::new(ServerInfo::default());
        let mut payload_buf = vec![0_u8; HEADER_SIZE + 4 + CRC_SIZE];
        let mut writer =
            PacketWriter::new(&mut payload_buf, routing_id::SPHERE, 0, false).unwrap();
        writer.write_payload(&[1, 2, 3, 4]).unwrap();
        let len = writer.finish().unwrap();
        let result = scene.dispatch(PacketView::parse(&payload_buf[..len]).unwrap());
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn save_snapshot_emits_server_info_first() {
        let scene = Scene::new(ServerInfo::default());
        scene.register_handler(Box::new(CategoryHandler::new()));
        let mut packets = Vec::new();
        scene
            .save_snapshot(&mut |bytes| {
                packets.push(bytes.to_vec());
                Ok(())
            })
            .unwrap();
        assert!(!packets.is_empty());
        let first = PacketView::parse(&packets[0]).unwrap();
        assert_eq!(first.routing_id(), routing_id::SERVER_INFO);
    }
}
