//! A generic create/update/destroy lifecycle tracker shared by every shape
//! routing id (sphere, box, cone, ...). Geometry itself is opaque bytes:
//! this crate does not know how to render a shape, only how to keep its
//! latest wire-level state around for snapshotting and replay.

use crate::error::{Error, Result};
use crate::handler::{FrameStamp, Handler};
use crate::id::Id;
use crate::messages::ObjectHeader;
use crate::packet::{PacketView, HEADER_SIZE};
use std::collections::HashMap;

/// Message ids within any shape's routing id. Shared across every shape
/// type; type-specific body layout is left as opaque bytes.
pub mod shape_message_id {
    pub const CREATE: u16 = 0;
    pub const UPDATE: u16 = 1;
    pub const DESTROY: u16 = 2;
    pub const DATA: u16 = 3;
}

/// The last-known wire state of one addressable shape instance.
#[derive(Debug, Clone)]
struct ShapeEntry {
    header: ObjectHeader,
    /// Raw bytes of the most recent `CREATE`/`UPDATE` body, following the
    /// shared [`ObjectHeader`] prefix.
    body: Vec<u8>,
}

/// Tracks every addressable shape instance for a single shape routing id.
///
/// Non-transient shapes (`id != 0`) are keyed by id and persist across
/// frames until an explicit `DESTROY`. Transient shapes (`id == 0`) are
/// visible for exactly the frame they arrive in: each `CREATE` is appended
/// to `pending_transients` and every one of them is dropped the next time
/// `end_frame` runs, so a transient is visible from the moment it is
/// created until the frame that created it ends.
pub struct TransientEntityHandler {
    routing_id: u16,
    name: String,
    shapes: HashMap<Id, ShapeEntry>,
    pending_transients: Vec<ShapeEntry>,
}

impl TransientEntityHandler {
    #[must_use]
    pub fn new(routing_id: u16, name: impl Into<String>) -> Self {
        Self {
            routing_id,
            name: name.into(),
            shapes: HashMap::new(),
            pending_transients: Vec::new(),
        }
    }

    /// Number of shapes currently visible: persistent shapes plus any
    /// transient created during the frame in progress.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shapes.len() + self.pending_transients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of transient (single-frame) shapes currently pending
    /// destruction at the next `end_frame`.
    #[must_use]
    pub fn transient_count(&self) -> usize {
        self.pending_transients.len()
    }

    #[must_use]
    pub fn get(&self, id: Id) -> Option<&[u8]> {
        self.shapes.get(&id).map(|e| e.body.as_slice())
    }

    fn apply_create(&mut self, payload: &[u8]) -> Result<()> {
        let header = ObjectHeader::read(payload)?;
        let body = payload[ObjectHeader::WIRE_SIZE..].to_vec();
        if header.id.is_transient() {
            self.pending_transients.push(ShapeEntry { header, body });
            return Ok(());
        }
        self.shapes.insert(header.id, ShapeEntry { header, body });
        Ok(())
    }

    fn apply_update(&mut self, payload: &[u8]) -> Result<()> {
        let header = ObjectHeader::read(payload)?;
        let Some(entry) = self.shapes.get_mut(&header.id) else {
            // Update for an id we never saw created; ignore rather than
            // error, matching the wire's best-effort semantics.
            return Ok(());
        };
        entry.header.flags = header.flags;
        entry.body = payload[ObjectHeader::WIRE_SIZE..].to_vec();
        Ok(())
    }

    fn apply_destroy(&mut self, payload: &[u8]) -> Result<()> {
        let header = ObjectHeader::read(payload)?;
        self.shapes.remove(&header.id);
        Ok(())
    }
}

impl Handler for TransientEntityHandler {
    fn routing_id(&self) -> u16 {
        self.routing_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn reset(&mut self) {
        self.shapes.clear();
        self.pending_transients.clear();
    }

    fn end_frame(&mut self, _stamp: FrameStamp) {
        // Transients are visible for exactly the frame they were created
        // in; once that frame ends they are destroyed unconditionally.
        self.pending_transients.clear();
    }

    fn read_message(&mut self, packet: PacketView<'_>) -> Result<()> {
        let payload = packet.payload();
        match packet.message_id() {
            shape_message_id::CREATE => self.apply_create(payload),
            shape_message_id::UPDATE => self.apply_update(payload),
            shape_message_id::DESTROY => self.apply_destroy(payload),
            shape_message_id::DATA => Ok(()),
            _ => Err(Error::Truncated),
        }
    }

    fn serialise(&self, emit: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()> {
        use crate::packet::PacketWriter;
        for entry in self.shapes.values() {
            let mut payload = vec![0_u8; ObjectHeader::WIRE_SIZE + entry.body.len()];
            entry.header.write(&mut payload)?;
            payload[ObjectHeader::WIRE_SIZE..].copy_from_slice(&entry.body);

            let mut buf = vec![0_u8; HEADER_SIZE + payload.len() + crate::packet::CRC_SIZE];
            let mut writer =
                PacketWriter::new(&mut buf, self.routing_id, shape_message_id::CREATE, false)?;
            writer.write_payload(&payload)?;
            let len = writer.finish()?;
            emit(&buf[..len])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{routing_id, PacketWriter};

    fn build_create(id: Id, flags: u16, extra: &[u8]) -> Vec<u8> {
        let header = ObjectHeader { id, flags };
        let mut payload = vec![0_u8; ObjectHeader::WIRE_SIZE + extra.len()];
        header.write(&mut payload).unwrap();
        payload[ObjectHeader::WIRE_SIZE..].copy_from_slice(extra);

        let mut buf = vec![0_u8; HEADER_SIZE + payload.len() + 2];
        let mut writer =
            PacketWriter::new(&mut buf, routing_id::SPHERE, shape_message_id::CREATE, false)
                .unwrap();
        writer.write_payload(&payload).unwrap();
        let len = writer.finish().unwrap();
        buf.truncate(len);
        buf
    }

    #[test]
    fn tracks_created_shape() {
        let mut handler = TransientEntityHandler::new(routing_id::SPHERE, "sphere");
        let id = Id::new(5, 0);
        let packet = build_create(id, 1, b"extra-geom");
        handler
            .read_message(PacketView::parse(&packet).unwrap())
            .unwrap();
        assert_eq!(handler.len(), 1);
        assert_eq!(handler.get(id), Some(b"extra-geom".as_slice()));
    }

    #[test]
    fn transient_id_zero_is_visible_until_end_frame() {
        let mut handler = TransientEntityHandler::new(routing_id::SPHERE, "sphere");
        let packet = build_create(Id::new(0, 0), 0, b"");
        handler
            .read_message(PacketView::parse(&packet).unwrap())
            .unwrap();
        assert_eq!(handler.len(), 1);
        assert_eq!(handler.transient_count(), 1);

        handler.end_frame(FrameStamp::default());
        assert!(handler.is_empty());
    }

    #[test]
    fn two_successive_end_frames_never_leave_a_transient_behind() {
        let mut handler = TransientEntityHandler::new(routing_id::SPHERE, "sphere");
        let packet = build_create(Id::new(0, 0), 0, b"");
        handler
            .read_message(PacketView::parse(&packet).unwrap())
            .unwrap();
        handler.end_frame(FrameStamp::default());
        handler.end_frame(FrameStamp::default());
        assert!(handler.is_empty());
    }

    #[test]
    fn destroy_removes_tracked_shape() {
        let mut handler = TransientEntityHandler::new(routing_id::SPHERE, "sphere");
        let id = Id::new(9, 0);
        let create = build_create(id, 0, b"x");
        handler
            .read_message(PacketView::parse(&create).unwrap())
            .unwrap();

        let header = ObjectHeader { id, flags: 0 };
        let mut payload = [0_u8; ObjectHeader::WIRE_SIZE];
        header.write(&mut payload).unwrap();
        let mut buf = vec![0_u8; HEADER_SIZE + payload.len() + 2];
        let mut writer = PacketWriter::new(
            &mut buf,
            routing_id::SPHERE,
            shape_message_id::DESTROY,
            false,
        )
        .unwrap();
        writer.write_payload(&payload).unwrap();
        let len = writer.finish().unwrap();

        handler
            .read_message(PacketView::parse(&buf[..len]).unwrap())
            .unwrap();
        assert!(handler.is_empty());
    }
}
