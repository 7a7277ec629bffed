//! Live TCP connection to a Third Eye Scene server: reads packets as fast
//! as they arrive, applies them to the scene immediately, and optionally
//! tees everything to a [`Recorder`].

use crate::data_thread::DataThread;
use crate::error::Result;
use crate::recorder::Recorder;
use parking_lot::Mutex;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tes_core::collated::CollatedPacketDecoder;
use tes_core::messages::ServerInfo;
use tes_core::packet::{control_id, routing_id};
use tes_core::scene::{Scene, SceneEvent};
use tes_core::stream_reader::{PacketStreamReader, Status};

/// Supplies the current viewer camera pose (already encoded as a `CAMERA`
/// message payload) to tee into a recording on every `FRAME`. The network
/// thread has no camera model of its own; this is the seam a caller
/// plugs a real camera controller into.
pub type CameraPoseProvider = dyn Fn() -> Vec<u8> + Send + Sync;

/// How long to wait before retrying a dropped or refused connection.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(200);

/// Socket read timeout: bounds how long a read on a quiet connection can
/// block, so the connection loop below revisits `shared.quit` at least this
/// often instead of stalling until the peer sends more data.
const READ_TIMEOUT: Duration = Duration::from_millis(200);

struct Shared {
    connected: AtomicBool,
    connection_attempted: AtomicBool,
    quit: AtomicBool,
}

/// Drives a live connection on a background thread, applying every packet
/// to `scene` as it is read.
pub struct NetworkThread {
    scene: Arc<Scene>,
    shared: Arc<Shared>,
    host: String,
    port: u16,
    allow_reconnect: bool,
    recorder: Arc<Mutex<Option<Recorder>>>,
    camera_provider: Arc<Mutex<Option<Box<CameraPoseProvider>>>>,
    handle: Option<JoinHandle<()>>,
}

impl NetworkThread {
    /// Spawns the background thread immediately; it begins attempting to
    /// connect to `host:port` right away.
    #[must_use]
    pub fn spawn(scene: Arc<Scene>, host: impl Into<String>, port: u16, allow_reconnect: bool) -> Self {
        let host = host.into();
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(false),
            connection_attempted: AtomicBool::new(false),
            quit: AtomicBool::new(false),
        });
        let recorder: Arc<Mutex<Option<Recorder>>> = Arc::new(Mutex::new(None));
        let camera_provider: Arc<Mutex<Option<Box<CameraPoseProvider>>>> = Arc::new(Mutex::new(None));

        let thread_scene = Arc::clone(&scene);
        let thread_shared = Arc::clone(&shared);
        let thread_recorder = Arc::clone(&recorder);
        let thread_camera = Arc::clone(&camera_provider);
        let thread_host = host.clone();

        let handle = std::thread::Builder::new()
            .name("tes-network".into())
            .spawn(move || {
                run(
                    thread_scene,
                    thread_shared,
                    thread_recorder,
                    thread_camera,
                    thread_host,
                    port,
                    allow_reconnect,
                )
            })
            .expect("failed to spawn network thread");

        Self {
            scene,
            shared,
            host,
            port,
            allow_reconnect,
            recorder,
            camera_provider,
            handle: Some(handle),
        }
    }

    /// Installs the callback used to fetch the current viewer camera pose
    /// (pre-encoded as a `CAMERA` message payload) whenever a `FRAME`
    /// boundary is recorded. Replaces any previously installed provider.
    pub fn set_camera_provider(&self, provider: impl Fn() -> Vec<u8> + Send + Sync + 'static) {
        *self.camera_provider.lock() = Some(Box::new(provider));
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn allow_reconnect(&self) -> bool {
        self.allow_reconnect
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn connection_attempted(&self) -> bool {
        self.shared.connection_attempted.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.recorder.lock().is_some()
    }

    pub fn start_recording(&self, path: impl Into<std::path::PathBuf>) -> Result<()> {
        let recorder = Recorder::create(path)?;
        *self.recorder.lock() = Some(recorder);
        Ok(())
    }

    pub fn end_recording(&self) {
        if let Some(mut recorder) = self.recorder.lock().take() {
            let _ = recorder.close();
        }
    }

    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl DataThread for NetworkThread {
    fn scene(&self) -> &Arc<Scene> {
        &self.scene
    }

    fn is_live_stream(&self) -> bool {
        true
    }

    /// A live connection has no timeline to seek; this is a no-op.
    fn set_target_frame(&self, _frame: u32) {}

    fn target_frame(&self) -> u32 {
        0
    }

    fn stop(&self) {
        self.shared.quit.store(true, Ordering::Release);
    }

    fn is_stopping(&self) -> bool {
        self.shared.quit.load(Ordering::Acquire)
    }
}

#[allow(clippy::too_many_arguments)]
fn run(
    scene: Arc<Scene>,
    shared: Arc<Shared>,
    recorder: Arc<Mutex<Option<Recorder>>>,
    camera_provider: Arc<Mutex<Option<Box<CameraPoseProvider>>>>,
    host: String,
    port: u16,
    allow_reconnect: bool,
) {
    loop {
        if shared.quit.load(Ordering::Acquire) {
            return;
        }

        shared.connection_attempted.store(true, Ordering::Release);
        let stream = match TcpStream::connect((host.as_str(), port)) {
            Ok(stream) => stream,
            Err(err) => {
                log::debug!("network thread: connect to {host}:{port} failed: {err}");
                if !allow_reconnect {
                    return;
                }
                std::thread::sleep(RECONNECT_DELAY);
                continue;
            }
        };
        if stream.set_nodelay(true).is_err() {
            log::warn!("network thread: failed to set TCP_NODELAY");
        }
        // Block on reads but with a bounded timeout, so a quiet socket still
        // lets this loop notice `shared.quit` within one `READ_TIMEOUT`
        // instead of stalling until the peer sends something.
        if stream.set_read_timeout(Some(READ_TIMEOUT)).is_err() {
            log::warn!("network thread: failed to set read timeout");
        }
        shared.connected.store(true, Ordering::Release);
        log::info!("network thread: connected to {host}:{port}");

        let server_info = Arc::new(Mutex::new(ServerInfo::default()));
        // 1 MiB read chunks for a live socket, matching the buffer size a
        // live connection is expected to read in.
        let mut reader = PacketStreamReader::with_chunk_size(stream, 1024 * 1024);
        let mut decoder = CollatedPacketDecoder::new();

        'connection: loop {
            if shared.quit.load(Ordering::Acquire) {
                shared.connected.store(false, Ordering::Release);
                return;
            }
            let (status, packet) = reader.extract_packet();
            match status {
                // `Dropped` still carries a packet when the resync found
                // one within the same call; process it exactly like a
                // clean `Success` once it's in hand.
                Status::Success | Status::Dropped => {
                    let Some(extracted) = packet else { continue };
                    // Record the raw on-the-wire bytes verbatim (collated
                    // or not) so a later replay sees byte-identical input;
                    // unwrap only for our own dispatch below.
                    if let Some(mut guard) = recorder.try_lock() {
                        if let Some(rec) = guard.as_mut() {
                            if rec.state() == crate::recorder::RecorderState::PendingSnapshot {
                                let _ = rec.mark_snapshot(*server_info.lock(), &scene);
                            } else {
                                let _ = rec.record_packet(extracted.as_bytes());
                            }
                        }
                    }

                    if decoder.set_packet(extracted.view()).is_err() {
                        log::warn!("network thread: failed to unpack collated packet");
                        continue;
                    }
                    let mut saw_frame = false;
                    let mut should_end = false;
                    while let Some(view) = decoder.next() {
                        if view.routing_id() == routing_id::SERVER_INFO {
                            if let Ok(info) = ServerInfo::read(view.payload()) {
                                *server_info.lock() = info;
                            }
                        }
                        saw_frame |= view.routing_id() == routing_id::CONTROL
                            && view.message_id() == control_id::FRAME;
                        match scene.dispatch(view) {
                            Ok(Some(SceneEvent::End)) => should_end = true,
                            Ok(_) => {}
                            Err(err) => log::warn!("network thread: failed to apply packet: {err}"),
                        }
                    }

                    if saw_frame {
                        // `dispatch` above only staged the frame (and any
                        // `SERVER_INFO`); promote it now. A live connection
                        // has no separate render-loop thread of its own
                        // here, so it plays both halves of the hand-off,
                        // same as the stream thread's file-replay path.
                        scene.prepare_frame();
                        if let Some(mut guard) = recorder.try_lock() {
                            if let Some(rec) = guard.as_mut() {
                                if rec.state() == crate::recorder::RecorderState::Recording {
                                    if let Some(provider) = camera_provider.lock().as_ref() {
                                        let payload = provider();
                                        let _ = rec.record_camera(&payload);
                                    }
                                }
                            }
                        }
                    }

                    if should_end {
                        break 'connection;
                    }
                }
                Status::Incomplete => std::thread::sleep(Duration::from_millis(1)),
                Status::End | Status::NoStream => break 'connection,
            }
        }

        shared.connected.store(false, Ordering::Release);
        if !allow_reconnect || shared.quit.load(Ordering::Acquire) {
            return;
        }
        std::thread::sleep(RECONNECT_DELAY);
    }
}
