//! Tracks mesh resources referenced by `MESH_SHAPE`/`MESH_SET` messages,
//! mirroring `handler::MeshResource`'s lifecycle minus GPU upload.

use crate::codec;
use crate::data_buffer::{DataBuffer, Quantisation};
use crate::error::Result;
use crate::handler::{FrameStamp, Handler};
use crate::id::Id;
use crate::packet::PacketView;
use std::collections::HashMap;
use std::sync::Arc;

/// Message ids within the `MESH` routing id. A mesh resource is announced
/// with `CREATE`, built up from any number of `VERTEX`/`INDEX`/`NORMAL`/
/// `COLOUR`/`UV` component-stream messages (each a [`DataBuffer`]-encoded
/// payload, possibly split across several messages covering different
/// element-offset ranges), then promoted to `Ready` by `FINALISE`.
pub mod mesh_message_id {
    pub const CREATE: u16 = 0;
    pub const DESTROY: u16 = 1;
    pub const VERTEX: u16 = 2;
    pub const INDEX: u16 = 3;
    pub const NORMAL: u16 = 4;
    pub const COLOUR: u16 = 5;
    pub const UV: u16 = 6;
    pub const FINALISE: u16 = 7;
}

/// Size of the `{id:u32, category:u16}` prefix shared by every mesh
/// resource message.
const ID_PREFIX_SIZE: usize = 4 + 2;

fn read_id(payload: &[u8]) -> Result<Id> {
    let numeric_id = codec::read_u32(payload, 0)?;
    let category = codec::read_u16(payload, 4)?;
    Ok(Id::new(numeric_id, category))
}

/// Where a mesh resource sits in its construction lifecycle. Resources are
/// built incrementally across several messages (vertices, indices,
/// normals, colours can each arrive as separate component-stream
/// messages), so a resource is not considered renderable until `FINALISE`
/// is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// `CREATE` seen; vertex/index/normal/colour/uv streams may still be
    /// arriving.
    Announced,
    /// At least one component-stream message has been applied.
    Building,
    /// `FINALISE` seen; the resource is stable and safe to reference.
    Ready,
    /// A `DESTROY` arrived, but other shapes may still hold a reference.
    MarkedForDeath,
}

/// The geometry accumulated for one mesh resource. Once a resource reaches
/// [`ResourceState::Ready`] it is frozen: any subsequent rebuild allocates a
/// fresh `MeshResource` and swaps the `Arc`, rather than mutating data a
/// renderer may be holding a reference to mid-frame.
#[derive(Debug, Default, Clone)]
pub struct MeshResource {
    pub vertices: Vec<[f32; 3]>,
    pub indices: Vec<u32>,
    pub normals: Vec<[f32; 3]>,
    pub colours: Vec<u32>,
    pub uvs: Vec<[f32; 2]>,
}

impl MeshResource {
    fn write_component(
        target: &mut Vec<[f32; 3]>,
        element_offset: u32,
        buffer: &DataBuffer<'_>,
    ) -> Result<()> {
        let start = element_offset as usize;
        let end = start + buffer.len();
        if target.len() < end {
            target.resize(end, [0.0; 3]);
        }
        for i in 0..buffer.len() {
            let mut v = [0.0_f32; 3];
            for (axis, slot) in v.iter_mut().enumerate() {
                *slot = buffer.scalar_as_f64(i * buffer.component_count() as usize + axis) as f32;
            }
            target[start + i] = v;
        }
        Ok(())
    }

    fn write_uv(target: &mut Vec<[f32; 2]>, element_offset: u32, buffer: &DataBuffer<'_>) {
        let start = element_offset as usize;
        let end = start + buffer.len();
        if target.len() < end {
            target.resize(end, [0.0; 2]);
        }
        for i in 0..buffer.len() {
            let mut v = [0.0_f32; 2];
            for (axis, slot) in v.iter_mut().enumerate() {
                *slot = buffer.scalar_as_f64(i * buffer.component_count() as usize + axis) as f32;
            }
            target[start + i] = v;
        }
    }

    fn write_indices(target: &mut Vec<u32>, element_offset: u32, buffer: &DataBuffer<'_>) -> Result<()> {
        let start = element_offset as usize;
        let end = start + buffer.len();
        if target.len() < end {
            target.resize(end, 0);
        }
        for i in 0..buffer.len() {
            target[start + i] = buffer.get_i32(i)? as u32;
        }
        Ok(())
    }

    fn write_colours(target: &mut Vec<u32>, element_offset: u32, buffer: &DataBuffer<'_>) -> Result<()> {
        let start = element_offset as usize;
        let end = start + buffer.len();
        if target.len() < end {
            target.resize(end, 0xFFFF_FFFF);
        }
        for i in 0..buffer.len() {
            target[start + i] = buffer.get_i32(i)? as u32;
        }
        Ok(())
    }
}

struct Entry {
    resource: Arc<MeshResource>,
    state: ResourceState,
    /// Number of shapes currently referencing this resource; it is only
    /// dropped from the table once this reaches zero after being marked
    /// for death.
    refcount: u32,
}

/// Owns every known mesh resource, keyed by [`Id`].
#[derive(Default)]
pub struct MeshResourceHandler {
    resources: HashMap<Id, Entry>,
}

impl MeshResourceHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self, id: Id) -> Option<ResourceState> {
        self.resources.get(&id).map(|e| e.state)
    }

    /// Returns a cloned handle to the resource if it exists; shapes hold
    /// this handle independent of the handler's own lifecycle, so a
    /// `DESTROY` while referenced does not invalidate outstanding handles.
    #[must_use]
    pub fn acquire(&mut self, id: Id) -> Option<Arc<MeshResource>> {
        let entry = self.resources.get_mut(&id)?;
        entry.refcount += 1;
        Some(Arc::clone(&entry.resource))
    }

    /// Releases a previously acquired handle; drops the entry entirely if
    /// it had been marked for death and this was the last reference.
    pub fn release(&mut self, id: Id) {
        let Some(entry) = self.resources.get_mut(&id) else {
            return;
        };
        entry.refcount = entry.refcount.saturating_sub(1);
        if entry.state == ResourceState::MarkedForDeath && entry.refcount == 0 {
            self.resources.remove(&id);
        }
    }

    fn create(&mut self, id: Id) {
        self.resources.insert(
            id,
            Entry {
                resource: Arc::new(MeshResource::default()),
                state: ResourceState::Announced,
                refcount: 0,
            },
        );
    }

    fn mark_destroyed(&mut self, id: Id) {
        if let Some(entry) = self.resources.get_mut(&id) {
            entry.state = ResourceState::MarkedForDeath;
            if entry.refcount == 0 {
                self.resources.remove(&id);
            }
        }
    }

    fn finalise(&mut self, id: Id) {
        if let Some(entry) = self.resources.get_mut(&id) {
            entry.state = ResourceState::Ready;
        }
    }

    /// Applies one component-stream message, cloning-then-mutating the
    /// resource's `MeshResource` (the `Arc` is never mutated through a
    /// live reference — see [`MeshResource`]'s doc comment) and swapping
    /// it back in.
    fn apply_component(&mut self, id: Id, message_id: u16, payload: &[u8]) -> Result<()> {
        let Some(entry) = self.resources.get_mut(&id) else {
            return Ok(());
        };
        let (element_offset, buffer) = DataBuffer::read(payload, None)?;
        let mut resource = (*entry.resource).clone();
        match message_id {
            mesh_message_id::VERTEX => {
                MeshResource::write_component(&mut resource.vertices, element_offset, &buffer)?;
            }
            mesh_message_id::NORMAL => {
                MeshResource::write_component(&mut resource.normals, element_offset, &buffer)?;
            }
            mesh_message_id::INDEX => {
                MeshResource::write_indices(&mut resource.indices, element_offset, &buffer)?;
            }
            mesh_message_id::COLOUR => {
                MeshResource::write_colours(&mut resource.colours, element_offset, &buffer)?;
            }
            mesh_message_id::UV => {
                MeshResource::write_uv(&mut resource.uvs, element_offset, &buffer);
            }
            _ => return Ok(()),
        }
        entry.resource = Arc::new(resource);
        if entry.state == ResourceState::Announced {
            entry.state = ResourceState::Building;
        }
        Ok(())
    }
}

impl Handler for MeshResourceHandler {
    fn routing_id(&self) -> u16 {
        crate::packet::routing_id::MESH
    }

    fn name(&self) -> &str {
        "mesh_resource"
    }

    fn reset(&mut self) {
        self.resources.clear();
    }

    fn end_frame(&mut self, _stamp: FrameStamp) {}

    fn read_message(&mut self, packet: PacketView<'_>) -> Result<()> {
        let payload = packet.payload();
        let id = read_id(payload)?;
        let body = &payload[ID_PREFIX_SIZE..];
        match packet.message_id() {
            mesh_message_id::CREATE => self.create(id),
            mesh_message_id::DESTROY => self.mark_destroyed(id),
            mesh_message_id::FINALISE => self.finalise(id),
            message_id @ (mesh_message_id::VERTEX
            | mesh_message_id::INDEX
            | mesh_message_id::NORMAL
            | mesh_message_id::COLOUR
            | mesh_message_id::UV) => self.apply_component(id, message_id, body)?,
            _ => {}
        }
        Ok(())
    }

    fn serialise(&self, emit: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()> {
        use crate::packet::{routing_id, PacketWriter, CRC_SIZE, HEADER_SIZE};

        let mut emit_message = |message_id: u16, body: &[u8]| -> Result<()> {
            let mut buf = vec![0_u8; HEADER_SIZE + body.len() + CRC_SIZE];
            let mut writer = PacketWriter::new(&mut buf, routing_id::MESH, message_id, false)?;
            writer.write_payload(body)?;
            let len = writer.finish()?;
            emit(&buf[..len])
        };

        for (&id, entry) in &self.resources {
            if entry.state == ResourceState::MarkedForDeath {
                continue;
            }
            let mut header = vec![0_u8; ID_PREFIX_SIZE];
            codec::write_u32(&mut header, 0, id.numeric_id())?;
            codec::write_u16(&mut header, 4, id.category())?;
            emit_message(mesh_message_id::CREATE, &header)?;

            if !entry.resource.vertices.is_empty() {
                let flat: Vec<f32> = entry
                    .resource
                    .vertices
                    .iter()
                    .flat_map(|v| v.iter().copied())
                    .collect();
                let mut buffer: DataBuffer<'_> = DataBuffer::from(flat);
                buffer = with_component_count(buffer, 3);
                let (encoded, _) = buffer.write(
                    crate::data_buffer::DataStreamType::Float32,
                    0,
                    Quantisation::default(),
                    usize::MAX,
                )?;
                let mut body = header.clone();
                body.extend_from_slice(&encoded);
                emit_message(mesh_message_id::VERTEX, &body)?;
            }
            if !entry.resource.indices.is_empty() {
                let as_i32: Vec<i32> = entry.resource.indices.iter().map(|&v| v as i32).collect();
                let buffer: DataBuffer<'_> = DataBuffer::from(as_i32);
                let (encoded, _) = buffer.write(
                    crate::data_buffer::DataStreamType::Int32,
                    0,
                    Quantisation::default(),
                    usize::MAX,
                )?;
                let mut body = header.clone();
                body.extend_from_slice(&encoded);
                emit_message(mesh_message_id::INDEX, &body)?;
            }

            if entry.state == ResourceState::Ready {
                emit_message(mesh_message_id::FINALISE, &header)?;
            }
        }
        Ok(())
    }
}

/// Reinterprets a flat-`Vec`-backed [`DataBuffer`] as having
/// `component_count` components per element; `DataBuffer::from` always
/// produces a `component_count == 1` buffer, which is wrong for
/// interleaved vertex/UV streams.
fn with_component_count<'a>(buffer: DataBuffer<'a>, component_count: u8) -> DataBuffer<'a> {
    match buffer {
        DataBuffer::Float32 { data, .. } => DataBuffer::Float32 {
            data,
            component_count,
        },
        other => other,
    }
}
