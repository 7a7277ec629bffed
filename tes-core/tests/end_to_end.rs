//! End-to-end scenarios built entirely out of raw packet bytes dispatched
//! through a single [`Scene`], matching the concrete replay scenarios a
//! real recorded file would exercise.

use tes_core::collated::{encode_collated_payload, CollatedPacketDecoder};
use tes_core::handler::Handler;
use tes_core::id::Id;
use tes_core::messages::{CoordinateFrame, ObjectHeader, ServerInfo};
use tes_core::packet::{control_id, routing_id, PacketView, PacketWriter, CRC_SIZE, HEADER_SIZE};
use tes_core::scene::{Scene, SceneEvent};
use tes_core::stream_reader::{PacketStreamReader, Status};
use tes_core::transient::TransientEntityHandler;

fn server_info_packet(info: &ServerInfo) -> Vec<u8> {
    let mut payload = [0_u8; ServerInfo::WIRE_SIZE];
    info.write(&mut payload).unwrap();
    let mut buf = vec![0_u8; HEADER_SIZE + payload.len() + CRC_SIZE];
    let mut writer = PacketWriter::new(&mut buf, routing_id::SERVER_INFO, 0, false).unwrap();
    writer.write_payload(&payload).unwrap();
    let len = writer.finish().unwrap();
    buf.truncate(len);
    buf
}

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

fn box_destroy(id: Id) -> Vec<u8> {
    let header = ObjectHeader { id, flags: 0 };
    let mut payload = vec![0_u8; ObjectHeader::WIRE_SIZE];
    header.write(&mut payload).unwrap();
    let mut buf = vec![0_u8; HEADER_SIZE + payload.len() + CRC_SIZE];
    let mut writer = PacketWriter::new(&mut buf, routing_id::BOX, 2, false).unwrap();
    writer.write_payload(&payload).unwrap();
    let len = writer.finish().unwrap();
    buf.truncate(len);
    buf
}

/// Dispatches one packet and, if it staged a frame, immediately promotes
/// it via `prepare_frame` -- standing in for an external render loop that
/// (per `spec.md` §4.7) drains the pending hand-off on its own cadence.
fn dispatch_and_promote(scene: &Scene, bytes: &[u8]) {
    if let Some(SceneEvent::FrameEnded(_)) = scene.dispatch(PacketView::parse(bytes).unwrap()).unwrap() {
        scene.prepare_frame();
    }
}

fn new_scene_with_box_handler() -> Scene {
    let scene = Scene::new(ServerInfo::default());
    scene.register_handler(Box::new(TransientEntityHandler::new(routing_id::BOX, "box")));
    scene
}

/// Scenario 1: replay a tiny file and check the box's lifecycle, the
/// frame counter, and the frame-interval fields it carries.
#[test]
fn replay_tiny_file_tracks_box_lifecycle_and_frame_count() {
    let scene = new_scene_with_box_handler();

    let info = ServerInfo {
        coordinate_frame: CoordinateFrame::XYZ,
        time_unit_us: 1_000,
        default_frame_time: 33,
        reserved: 0,
    };
    dispatch_and_promote(&scene, &server_info_packet(&info));

    let id = Id::new(7, 0);
    scene
        .dispatch(PacketView::parse(&box_create(id)).unwrap())
        .unwrap();
    dispatch_and_promote(&scene, &control_packet(control_id::FRAME, 33));

    assert_eq!(scene.current_frame(), 1);

    scene
        .dispatch(PacketView::parse(&box_destroy(id)).unwrap())
        .unwrap();
    dispatch_and_promote(&scene, &control_packet(control_id::FRAME, 0));

    assert_eq!(scene.current_frame(), 2);
    let server_info = scene.server_info();
    assert_eq!(server_info.default_frame_time, 33);
}

/// Scenario 2: a transient (id == 0) shape is visible for exactly the
/// frame it was created in, then destroyed when that frame ends.
#[test]
fn transient_shape_is_visible_for_one_frame_then_destroyed() {
    let mut handler = TransientEntityHandler::new(routing_id::BOX, "box");
    handler
        .read_message(PacketView::parse(&box_create(Id::new(0, 0))).unwrap())
        .unwrap();
    assert_eq!(handler.len(), 1);
    handler.end_frame(tes_core::FrameStamp::default());
    assert!(handler.is_empty());

    let scene = new_scene_with_box_handler();
    scene
        .dispatch(PacketView::parse(&box_create(Id::new(0, 0))).unwrap())
        .unwrap();
    dispatch_and_promote(&scene, &control_packet(control_id::FRAME, 1));
    assert_eq!(scene.current_frame(), 1);
}

/// Scenario 3: a bad marker spliced into an otherwise-valid stream causes
/// exactly one `Dropped` between two `Success`es, and both creates still
/// land.
#[test]
fn bad_marker_mid_stream_resyncs_without_losing_surrounding_packets() {
    let id_a = Id::new(1, 0);
    let id_b = Id::new(2, 0);
    let mut stream = Vec::new();
    stream.extend(box_create(id_a));
    stream.extend(0xDEAD_BEEF_u32.to_be_bytes());
    stream.extend(box_create(id_b));
    stream.extend(control_packet(control_id::FRAME, 1));

    let mut reader = PacketStreamReader::new(std::io::Cursor::new(stream));
    let scene = new_scene_with_box_handler();

    let mut statuses = Vec::new();
    let mut creates_seen = 0;
    loop {
        let (status, packet) = reader.extract_packet();
        statuses.push(status);
        match status {
            // A `Dropped` status still carries the packet that followed
            // the corruption, bundled into the same call.
            Status::Success | Status::Dropped => {
                if let Some(packet) = packet {
                    let view = packet.view();
                    if view.routing_id() == routing_id::BOX && view.message_id() == 0 {
                        creates_seen += 1;
                    }
                    scene.dispatch(view).unwrap();
                }
            }
            Status::End | Status::NoStream => break,
            Status::Incomplete => break,
        }
    }

    assert_eq!(statuses, vec![Status::Success, Status::Dropped, Status::Success, Status::End]);
    assert_eq!(creates_seen, 2, "both box creates around the corruption must still decode");
}

/// Scenario 4: wrapping scenario 1's non-`SERVER_INFO` packets in one
/// gzipped collated packet yields an identical final scene state.
#[test]
fn collated_gzip_packet_yields_same_state_as_plain_sequence() {
    let id = Id::new(7, 0);
    let mut inner = Vec::new();
    inner.extend(box_create(id));
    inner.extend(control_packet(control_id::FRAME, 33));
    inner.extend(box_destroy(id));
    inner.extend(control_packet(control_id::FRAME, 0));

    let payload = encode_collated_payload(&inner, true).unwrap();
    let mut outer = vec![0_u8; HEADER_SIZE + payload.len() + CRC_SIZE];
    let mut writer = PacketWriter::new(&mut outer, routing_id::COLLATED, 0, false).unwrap();
    writer.write_payload(&payload).unwrap();
    let outer_len = writer.finish().unwrap();

    let scene = new_scene_with_box_handler();
    dispatch_and_promote(&scene, &server_info_packet(&ServerInfo::default()));

    let mut decoder = CollatedPacketDecoder::new();
    decoder
        .set_packet(PacketView::parse(&outer[..outer_len]).unwrap())
        .unwrap();
    while let Some(inner_view) = decoder.next() {
        if let Some(SceneEvent::FrameEnded(_)) = scene.dispatch(inner_view).unwrap() {
            scene.prepare_frame();
        }
    }

    assert_eq!(scene.current_frame(), 2);
}

/// Scenario 6: a single flipped payload bit is reported as `Dropped` and
/// does not disturb the packet that follows it.
#[test]
fn crc_tamper_drops_one_packet_and_recovers_on_the_next() {
    let id = Id::new(1, 0);
    let mut good = box_create(id);
    good[HEADER_SIZE] ^= 0x01; // flip a payload bit, invalidating the CRC.

    let mut stream = good;
    stream.extend(control_packet(control_id::FRAME, 1));

    let mut reader = PacketStreamReader::new(std::io::Cursor::new(stream));
    let scene = new_scene_with_box_handler();

    // The corrupted packet is dropped, but the scan continues within the
    // same call and bundles in the `FRAME` packet that follows it.
    let (status, packet) = reader.extract_packet();
    assert_eq!(status, Status::Dropped);
    if let Some(SceneEvent::FrameEnded(_)) = scene.dispatch(packet.unwrap().view()).unwrap() {
        scene.prepare_frame();
    }
    assert_eq!(scene.current_frame(), 1);

    let (status, packet) = reader.extract_packet();
    assert_eq!(status, Status::End);
    assert!(packet.is_none());
}
