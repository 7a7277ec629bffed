//! Spawns a real [`StreamThread`] against a small file on disk and checks
//! that it drives a shared [`Scene`] end to end: applies every packet,
//! advances the frame counter, and stops cleanly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tes_core::config::{KeyframeSettings, PlaybackSettings};
use tes_core::id::Id;
use tes_core::messages::{ObjectHeader, ServerInfo};
use tes_core::packet::{control_id, routing_id, PacketWriter, CRC_SIZE, HEADER_SIZE};
use tes_core::scene::Scene;
use tes_core::transient::TransientEntityHandler;
use tes_replay::{DataThread, StreamThread};

fn control_packet(message_id: u16, value32: u32) -> Vec<u8> {
    let mut payload = [0_u8; 8];
    payload[0..4].copy_from_slice(&value32.to_be_bytes());
    let mut buf = vec![0_u8; HEADER_SIZE + payload.len() + CRC_SIZE];
    let mut writer = PacketWriter::new(&mut buf, routing_id::CONTROL, message_id, false).unwrap();
    writer.write_payload(&payload).unwrap();
    let len = writer.finish().unwrap();
    buf.truncate(len);
    buf
}

fn box_create(id: Id) -> Vec<u8> {
    let header = ObjectHeader { id, flags: 0 };
    let mut payload = vec![0_u8; ObjectHeader::WIRE_SIZE];
    header.write(&mut payload).unwrap();
    let mut buf = vec![0_u8; HEADER_SIZE + payload.len() + CRC_SIZE];
    let mut writer = PacketWriter::new(&mut buf, routing_id::BOX, 0, false).unwrap();
    writer.write_payload(&payload).unwrap();
    let len = writer.finish().unwrap();
    buf.truncate(len);
    buf
}

fn wait_until(mut check: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    check()
}

#[test]
fn stream_thread_replays_file_and_advances_scene_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let mut stream = Vec::new();
    stream.extend(box_create(Id::new(1, 0)));
    stream.extend(control_packet(control_id::FRAME, 10));
    stream.extend(control_packet(control_id::FRAME, 10));
    let recording_path = dir.path().join("recording.tes");
    std::fs::write(&recording_path, &stream).unwrap();

    let scene = Arc::new(Scene::new(ServerInfo::default()));
    scene.register_handler(Box::new(TransientEntityHandler::new(routing_id::BOX, "box")));

    let thread = StreamThread::spawn(
        Arc::clone(&scene),
        recording_path,
        PlaybackSettings {
            looping: false,
            playback_speed: 20.0,
        },
        KeyframeSettings {
            enabled: false,
            ..KeyframeSettings::default()
        },
        dir.path(),
    )
    .unwrap();

    assert!(!thread.is_paused());
    assert!(!thread.is_live_stream());

    let reached = wait_until(|| scene.current_frame() >= 2, Duration::from_secs(5));
    assert!(reached, "stream thread never reached frame 2");

    thread.stop();
    thread.join();
}
