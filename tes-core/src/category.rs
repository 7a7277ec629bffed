//! Tracks the category tree used to group and toggle shapes by subsystem,
//! mirroring `handler::Category` minus the rendering-side tree widget.

use crate::codec;
use crate::error::Result;
use crate::handler::{FrameStamp, Handler};
use crate::packet::PacketView;
use std::collections::HashMap;

/// One entry in the category tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryInfo {
    pub id: u16,
    pub parent_id: u16,
    pub name: String,
    pub default_active: bool,
}

/// Maintains the set of known categories and which are currently active.
///
/// Category messages are rare and unordered (a category can be announced
/// after shapes already reference it), so lookups key off a plain map
/// rather than an index into a dense array.
#[derive(Debug, Default)]
pub struct CategoryHandler {
    categories: HashMap<u16, CategoryInfo>,
    active: HashMap<u16, bool>,
}

impl CategoryHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn categories(&self) -> impl Iterator<Item = &CategoryInfo> {
        self.categories.values()
    }

    /// Whether category `id` should render, accounting for every ancestor
    /// up to the root (`parent_id == 0`): a category is active only if it
    /// and all of its ancestors are active. Unknown categories default to
    /// active, matching an unannounced category's implicit default.
    #[must_use]
    pub fn is_active(&self, id: u16) -> bool {
        let mut current = id;
        let mut visited = 0_u32;
        loop {
            if !self.active.get(&current).copied().unwrap_or(true) {
                return false;
            }
            let Some(info) = self.categories.get(&current) else {
                return true;
            };
            if info.parent_id == 0 || info.parent_id == current {
                return true;
            }
            // Guard against a malformed cycle in announced parent links.
            visited += 1;
            if visited > self.categories.len() as u32 {
                return true;
            }
            current = info.parent_id;
        }
    }

    pub fn set_active(&mut self, id: u16, active: bool) {
        self.active.insert(id, active);
    }

    fn apply_category_message(&mut self, payload: &[u8]) -> Result<()> {
        let id = codec::read_u16(payload, 0)?;
        let parent_id = codec::read_u16(payload, 2)?;
        let default_active = codec::read_u8(payload, 4)? != 0;
        let name_len = codec::read_u16(payload, 5)? as usize;
        let name_bytes = payload.get(7..7 + name_len).ok_or(crate::error::Error::Truncated)?;
        let name = String::from_utf8_lossy(name_bytes).into_owned();

        self.active.entry(id).or_insert(default_active);
        self.categories.insert(
            id,
            CategoryInfo {
                id,
                parent_id,
                name,
                default_active,
            },
        );
        Ok(())
    }
}

impl Handler for CategoryHandler {
    fn routing_id(&self) -> u16 {
        crate::packet::routing_id::CATEGORY
    }

    fn name(&self) -> &str {
        "category"
    }

    fn reset(&mut self) {
        self.categories.clear();
        self.active.clear();
    }

    fn end_frame(&mut self, _stamp: FrameStamp) {}

    fn read_message(&mut self, packet: PacketView<'_>) -> Result<()> {
        self.apply_category_message(packet.payload())
    }

    fn serialise(&self, emit: &mut dyn FnMut(&[u8]) -> Result<()>) -> Result<()> {
        use crate::packet::{routing_id, PacketWriter};
        for info in self.categories.values() {
            let name_bytes = info.name.as_bytes();
            let mut payload = vec![0_u8; 7 + name_bytes.len()];
            codec::write_u16(&mut payload, 0, info.id)?;
            codec::write_u16(&mut payload, 2, info.parent_id)?;
            codec::write_u8(&mut payload, 4, u8::from(info.default_active))?;
            codec::write_u16(&mut payload, 5, name_bytes.len() as u16)?;
            payload[7..].copy_from_slice(name_bytes);

            let mut buf = vec![0_u8; crate::packet::HEADER_SIZE + payload.len() + crate::packet::CRC_SIZE];
            let mut writer = PacketWriter::new(&mut buf, routing_id::CATEGORY, 0, false)?;
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

    fn encode_category(id: u16, parent: u16, name: &str, default_active: bool) -> Vec<u8> {
        let mut payload = vec![0_u8; 7 + name.len()];
        codec::write_u16(&mut payload, 0, id).unwrap();
        codec::write_u16(&mut payload, 2, parent).unwrap();
        codec::write_u8(&mut payload, 4, u8::from(default_active)).unwrap();
        codec::write_u16(&mut payload, 5, name.len() as u16).unwrap();
        payload[7..].copy_from_slice(name.as_bytes());
        payload
    }

    #[test]
    fn tracks_category_announcements() {
        let mut handler = CategoryHandler::new();
        let payload = encode_category(3, 0, "physics", true);
        handler.apply_category_message(&payload).unwrap();

        let info = handler.categories().find(|c| c.id == 3).unwrap();
        assert_eq!(info.name, "physics");
        assert_eq!(info.parent_id, 0);
        assert!(handler.is_active(3));
    }

    #[test]
    fn unknown_category_defaults_active() {
        let handler = CategoryHandler::new();
        assert!(handler.is_active(99));
    }

    #[test]
    fn is_active_recurses_through_inactive_ancestor() {
        let mut handler = CategoryHandler::new();
        handler
            .apply_category_message(&encode_category(1, 0, "root-child", true))
            .unwrap();
        handler
            .apply_category_message(&encode_category(2, 1, "leaf", true))
            .unwrap();
        assert!(handler.is_active(2));

        handler.set_active(1, false);
        assert!(!handler.is_active(1));
        assert!(
            !handler.is_active(2),
            "a leaf whose ancestor is inactive must not render"
        );
    }

    #[test]
    fn reset_clears_state() {
        let mut handler = CategoryHandler::new();
        let payload = encode_category(1, 0, "a", false);
        handler.apply_category_message(&payload).unwrap();
        handler.reset();
        assert_eq!(handler.categories().count(), 0);
        assert!(handler.is_active(1));
    }
}
