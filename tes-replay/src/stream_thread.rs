//! Replays a previously recorded file, driving the same [`Scene`] a live
//! connection would, but with pause/step/seek/loop controls and
//! keyframe-assisted backward seeking so a long recording doesn't have to
//! be replayed from byte zero to jump to frame 10,000.
//!
//! Ported from `StreamThread.h`/`.cpp`'s target-frame state machine,
//! catch-up mode and `skipToClosestKeyframe`/`keyframeNeeded` logic.

use crate::data_thread::DataThread;
use crate::error::{Error, Result};
use crate::keyframe_store::{temp_snapshot_path, Keyframe, KeyframeStore};
use parking_lot::{Condvar, Mutex};
use std::fs::File;
use std::io::{SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tes_core::collated::CollatedPacketDecoder;
use tes_core::config::{KeyframeSettings, PlaybackSettings};
use tes_core::messages::ControlMessage;
use tes_core::packet::{control_id, routing_id};
use tes_core::scene::Scene;
use tes_core::stream_reader::{PacketStreamReader, Status};

/// Where a target frame sits relative to the frame currently applied to
/// the scene; mirrors `StreamThread::checkTargetFrameState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetFrameState {
    NotSet,
    Reached,
    Behind,
    Ahead,
}

fn check_target_frame_state(current: u32, pending: bool, target: u32) -> TargetFrameState {
    if !pending {
        return TargetFrameState::NotSet;
    }
    match target.cmp(&current) {
        std::cmp::Ordering::Equal => TargetFrameState::Reached,
        std::cmp::Ordering::Less => TargetFrameState::Behind,
        std::cmp::Ordering::Greater => TargetFrameState::Ahead,
    }
}

/// Whether (and how) frame-counting side effects of a `CONTROL` message
/// should be suppressed while processing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameSuppression {
    /// Apply every control message normally.
    None,
    /// Fast-forwarding toward a target frame: `FRAME` still advances
    /// `current_frame` (via `Scene::set_current_frame`, bypassing handler
    /// `end_frame`/`prepare_frame`), but no other side effect fires.
    CatchUp,
    /// Replaying a keyframe snapshot file to restore handler state before
    /// a reverse seek: `FRAME`/`FRAME_COUNT`/`RESET` are fully ignored,
    /// since `current_frame` was already set explicitly by the caller.
    SnapshotReplay,
}

struct SharedState {
    target_frame: u32,
    pending_target: bool,
    looping: bool,
    playback_speed: f32,
    keyframes: KeyframeSettings,
}

/// Drives file replay on a background thread, applying every packet to
/// `scene` and exposing pause/seek/loop/speed controls.
pub struct StreamThread {
    scene: Arc<Scene>,
    data: Arc<Mutex<SharedState>>,
    notify: Arc<Condvar>,
    quit: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Opens `path` for replay and spawns the background thread
    /// immediately. Keyframe snapshots are written under `snapshot_dir`
    /// (typically a [`tempfile::TempDir`](https://docs.rs/tempfile)) as
    /// the replay progresses.
    pub fn spawn(
        scene: Arc<Scene>,
        path: impl Into<PathBuf>,
        playback: PlaybackSettings,
        keyframes: KeyframeSettings,
        snapshot_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let path = path.into();
        let snapshot_dir = snapshot_dir.into();
        let file = File::open(&path).map_err(Error::Io)?;
        let reader = PacketStreamReader::new(file);

        let data = Arc::new(Mutex::new(SharedState {
            target_frame: 0,
            pending_target: false,
            looping: playback.looping,
            playback_speed: PlaybackSettings::clamp_speed(playback.playback_speed),
            keyframes,
        }));
        let notify = Arc::new(Condvar::new());
        let quit = Arc::new(AtomicBool::new(false));

        let thread_scene = Arc::clone(&scene);
        let thread_data = Arc::clone(&data);
        let thread_notify = Arc::clone(&notify);
        let thread_quit = Arc::clone(&quit);

        let handle = std::thread::Builder::new()
            .name("tes-stream".into())
            .spawn(move || {
                run(
                    thread_scene,
                    thread_data,
                    thread_notify,
                    thread_quit,
                    reader,
                    KeyframeStore::new(),
                    snapshot_dir,
                )
            })
            .map_err(Error::Io)?;

        Ok(Self {
            scene,
            data,
            notify,
            quit,
            handle: Some(handle),
        })
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.scene.is_paused()
    }

    pub fn pause(&self) {
        self.scene.set_paused(true);
    }

    pub fn unpause(&self) {
        self.scene.set_paused(false);
        self.notify.notify_all();
    }

    /// Advances one frame and pauses again once it is reached; a no-op
    /// while already playing forward unpaused.
    pub fn step_frame(&self) {
        let next = self.scene.current_frame() + 1;
        self.set_target_frame(next);
    }

    #[must_use]
    pub fn looping(&self) -> bool {
        self.data.lock().looping
    }

    pub fn set_looping(&self, looping: bool) {
        self.data.lock().looping = looping;
    }

    #[must_use]
    pub fn playback_speed(&self) -> f32 {
        self.data.lock().playback_speed
    }

    pub fn set_playback_speed(&self, speed: f32) {
        self.data.lock().playback_speed = PlaybackSettings::clamp_speed(speed);
    }

    #[must_use]
    pub fn keyframe_settings(&self) -> KeyframeSettings {
        self.data.lock().keyframes
    }

    pub fn set_keyframe_settings(&self, settings: KeyframeSettings) {
        self.data.lock().keyframes = settings;
    }

    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl DataThread for StreamThread {
    fn scene(&self) -> &Arc<Scene> {
        &self.scene
    }

    fn is_live_stream(&self) -> bool {
        false
    }

    /// Requests playback seek to `frame`. Notifies unconditionally,
    /// regardless of pause state, so a paused thread wakes immediately to
    /// service a seek without requiring a separate `unpause()`.
    fn set_target_frame(&self, frame: u32) {
        {
            let mut guard = self.data.lock();
            guard.target_frame = frame;
            guard.pending_target = true;
        }
        self.notify.notify_all();
    }

    fn target_frame(&self) -> u32 {
        self.data.lock().target_frame
    }

    fn stop(&self) {
        self.quit.store(true, Ordering::Release);
        self.notify.notify_all();
    }

    fn is_stopping(&self) -> bool {
        self.quit.load(Ordering::Acquire)
    }
}

#[allow(clippy::too_many_lines)]
fn run(
    scene: Arc<Scene>,
    data: Arc<Mutex<SharedState>>,
    notify: Arc<Condvar>,
    quit: Arc<AtomicBool>,
    mut reader: PacketStreamReader<File>,
    mut keyframes: KeyframeStore,
    snapshot_dir: PathBuf,
) {
    let mut next_frame_start = Instant::now();
    let mut decoder = CollatedPacketDecoder::new();

    loop {
        if quit.load(Ordering::Acquire) {
            return;
        }

        let state = {
            let guard = data.lock();
            check_target_frame_state(scene.current_frame(), guard.pending_target, guard.target_frame)
        };

        match state {
            TargetFrameState::Behind => {
                scene.set_catching_up(true);
                let target = data.lock().target_frame;
                skip_to_closest_keyframe(&scene, &mut reader, &mut keyframes, target, &quit);
                continue;
            }
            TargetFrameState::Ahead => {
                scene.set_catching_up(true);
            }
            TargetFrameState::Reached => {
                data.lock().pending_target = false;
                scene.set_catching_up(false);
                next_frame_start = Instant::now();
            }
            TargetFrameState::NotSet => {
                scene.set_catching_up(false);
            }
        }

        if scene.is_paused() {
            let mut guard = data.lock();
            if !guard.pending_target {
                notify.wait_for(&mut guard, Duration::from_millis(200));
                continue;
            }
        }

        if quit.load(Ordering::Acquire) {
            return;
        }

        let catching_up = scene.is_catching_up();
        if !catching_up {
            let now = Instant::now();
            if now < next_frame_start {
                std::thread::sleep((next_frame_start - now).min(Duration::from_millis(50)));
                continue;
            }
        }

        let (status, extracted) = reader.extract_packet();
        match status {
            // `Dropped` still carries a packet when the resync found one
            // within the same call; apply it exactly as a clean `Success`.
            Status::Success | Status::Dropped => {
                let Some(extracted) = extracted else { continue };
                let stream_offset = extracted.stream_offset();
                let view = extracted.view();
                if decoder.set_packet(view).is_err() {
                    log::warn!("stream thread: failed to unpack collated packet");
                    continue;
                }
                let suppression = if catching_up {
                    FrameSuppression::CatchUp
                } else {
                    FrameSuppression::None
                };
                let mut frame_seen = None;
                while let Some(inner) = decoder.next() {
                    if !inner.header().is_version_compatible() {
                        log::warn!(
                            "stream thread: skipping packet with incompatible version {}.{}",
                            inner.header().version_major,
                            inner.header().version_minor
                        );
                        continue;
                    }
                    if let Some(value32) = process_control_message(&scene, inner, suppression) {
                        frame_seen = Some(value32);
                    }
                }
                if let Some(value32) = frame_seen {
                    let frame_number = scene.current_frame();
                    if !catching_up {
                        let info = scene.server_info();
                        let elapsed_units = if value32 == 0 {
                            info.default_frame_time
                        } else {
                            value32
                        };
                        let elapsed_us = u64::from(elapsed_units) * u64::from(info.time_unit_us);
                        let speed = f64::from(data.lock().playback_speed).max(f64::from(PlaybackSettings::MIN_SPEED));
                        let sleep_us = (elapsed_us as f64 / speed).round().max(0.0) as u64;
                        next_frame_start = Instant::now() + Duration::from_micros(sleep_us);

                        maybe_capture_keyframe(
                            &scene,
                            &mut keyframes,
                            &data,
                            &snapshot_dir,
                            frame_number,
                            stream_offset,
                        );
                    }
                }
            }
            Status::Incomplete => {
                std::thread::sleep(Duration::from_millis(1));
            }
            Status::End | Status::NoStream => {
                let looping = data.lock().looping;
                if looping {
                    if reader.seek(SeekFrom::Start(0)).is_err() {
                        return;
                    }
                    scene.reset_blocking(|| quit.load(Ordering::Acquire));
                    scene.set_current_frame(0);
                    let mut guard = data.lock();
                    guard.target_frame = 0;
                    guard.pending_target = true;
                } else {
                    std::thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }
}

/// Applies one inner packet. Returns `Some(value32)` if it was an
/// un-suppressed `FRAME` control message (the elapsed-time field driving
/// the next sleep interval).
fn process_control_message(
    scene: &Scene,
    view: tes_core::packet::PacketView<'_>,
    suppression: FrameSuppression,
) -> Option<u32> {
    if view.routing_id() != routing_id::CONTROL {
        if let Err(err) = scene.dispatch(view) {
            log::warn!("stream thread: failed to apply packet: {err}");
        }
        return None;
    }

    let message_id = view.message_id();
    let suppressed = matches!(suppression, FrameSuppression::SnapshotReplay)
        && matches!(
            message_id,
            control_id::FRAME | control_id::FRAME_COUNT | control_id::RESET
        );
    if suppressed {
        return None;
    }

    if message_id == control_id::FRAME && matches!(suppression, FrameSuppression::CatchUp) {
        // Advance the counter only; skip handler end_frame/prepare_frame.
        scene.set_current_frame(scene.current_frame() + 1);
        let value32 = ControlMessage::read(message_id, view.payload())
            .ok()
            .and_then(|msg| match msg {
                ControlMessage::Frame { value32, .. } => Some(value32),
                _ => None,
            })
            .unwrap_or(0);
        return Some(value32);
    }

    match scene.dispatch(view) {
        Ok(Some(tes_core::SceneEvent::FrameEnded(stamp))) => {
            // This thread has no separate render-loop consumer of its
            // own, so it plays both halves of the hand-off: `dispatch`
            // above staged the frame (data-thread side), and this call
            // promotes it (render-thread side) under `Scene`'s own
            // mutex. An embedding application with a real render loop is
            // free to call `Scene::prepare_frame` itself instead, on its
            // own cadence.
            scene.prepare_frame();
            Some(stamp.elapsed)
        }
        Ok(_) => None,
        Err(err) => {
            log::warn!("stream thread: failed to apply control packet: {err}");
            None
        }
    }
}

/// Whether frame `frame_number`/`stream_offset` satisfies every condition
/// in `settings` relative to the last captured keyframe (`last_frame`,
/// `last_offset`).
fn keyframe_ready(
    settings: KeyframeSettings,
    last_frame: u32,
    last_offset: u64,
    frame_number: u32,
    stream_offset: u64,
) -> bool {
    if !settings.enabled {
        return false;
    }
    let frame_ready = frame_number >= last_frame.saturating_add(settings.frame_interval);
    let min_separation_ready = frame_number >= last_frame.saturating_add(settings.frame_minimum_interval);
    let byte_interval = u64::from(settings.size_interval_mib) * 1024 * 1024;
    let byte_ready = byte_interval == 0 || stream_offset.saturating_sub(last_offset) >= byte_interval;
    frame_ready && min_separation_ready && byte_ready
}

fn maybe_capture_keyframe(
    scene: &Scene,
    keyframes: &mut KeyframeStore,
    data: &Mutex<SharedState>,
    snapshot_dir: &Path,
    frame_number: u32,
    stream_offset: u64,
) {
    let settings = data.lock().keyframes;
    let (last_frame, last_offset) = keyframes
        .last()
        .map_or((0, 0), |kf| (kf.frame_number, kf.stream_offset));

    if !keyframe_ready(settings, last_frame, last_offset, frame_number, stream_offset) {
        return;
    }

    make_keyframe(scene, keyframes, snapshot_dir, frame_number, stream_offset);
}

fn make_keyframe(
    scene: &Scene,
    keyframes: &mut KeyframeStore,
    snapshot_dir: &Path,
    frame_number: u32,
    stream_offset: u64,
) {
    let snapshot_path = temp_snapshot_path(snapshot_dir, frame_number);
    let result = File::create(&snapshot_path).and_then(|file| {
        let mut file = file;
        scene
            .save_snapshot(&mut |bytes: &[u8]| {
                file.write_all(bytes).map_err(tes_core::Error::from)
            })
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "snapshot write failed"))
    });
    if let Err(err) = result {
        log::warn!("stream thread: failed to write keyframe snapshot: {err}");
        return;
    }
    if let Err(err) = keyframes.add(Keyframe {
        frame_number,
        stream_offset,
        snapshot_path,
    }) {
        log::warn!("stream thread: keyframe store rejected new entry: {err}");
    }
}

/// Replays one keyframe snapshot file into `scene` with full frame-change
/// suppression, returning whether it replayed successfully.
fn replay_snapshot(scene: &Scene, path: &Path) -> bool {
    let Ok(file) = File::open(path) else {
        return false;
    };
    let mut reader = PacketStreamReader::new(file);
    let mut decoder = CollatedPacketDecoder::new();
    loop {
        let (status, extracted) = reader.extract_packet();
        match status {
            // `Dropped` still carries a packet when the resync found one
            // within the same call; apply it exactly as a clean `Success`.
            Status::Success | Status::Dropped => {
                let Some(extracted) = extracted else { continue };
                if decoder.set_packet(extracted.view()).is_err() {
                    return false;
                }
                while let Some(inner) = decoder.next() {
                    process_control_message(scene, inner, FrameSuppression::SnapshotReplay);
                }
            }
            Status::Incomplete => continue,
            Status::End | Status::NoStream => return true,
        }
    }
}

fn skip_to_closest_keyframe(
    scene: &Scene,
    reader: &mut PacketStreamReader<File>,
    keyframes: &mut KeyframeStore,
    target_frame: u32,
    quit: &AtomicBool,
) {
    loop {
        if quit.load(Ordering::Acquire) {
            return;
        }
        let Some(keyframe) = keyframes.lookup_nearest(target_frame).cloned() else {
            scene.reset_blocking(|| quit.load(Ordering::Acquire));
            let _ = reader.seek(SeekFrom::Start(0));
            scene.set_current_frame(0);
            return;
        };

        scene.reset_blocking(|| quit.load(Ordering::Acquire));
        scene.set_current_frame(keyframe.frame_number);

        if replay_snapshot(scene, &keyframe.snapshot_path) {
            let _ = reader.seek(SeekFrom::Start(keyframe.stream_offset));
            return;
        }

        log::warn!(
            "stream thread: keyframe at frame {} failed to replay, discarding and retrying",
            keyframe.frame_number
        );
        keyframes.remove(keyframe.frame_number);
    }
}
