//! Identifies a single scene entity (shape, mesh, category, ...) within its
//! owning handler's namespace.

/// A persistent entity id plus the category it was created in.
///
/// Constructing an `Id` directly from a pointer, for transient in-process
/// lookups, has no meaning over the wire protocol this crate implements and
/// is not supported here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id {
    numeric_id: u32,
    category: u16,
}

impl Id {
    #[must_use]
    pub const fn new(numeric_id: u32, category: u16) -> Self {
        Self {
            numeric_id,
            category,
        }
    }

    #[must_use]
    pub const fn numeric_id(self) -> u32 {
        self.numeric_id
    }

    #[must_use]
    pub const fn category(self) -> u16 {
        self.category
    }

    /// An id of `0` is reserved for transient (single-frame) shapes that
    /// are never individually addressable for update or destroy.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        self.numeric_id == 0
    }
}

impl From<u32> for Id {
    fn from(numeric_id: u32) -> Self {
        Self::new(numeric_id, 0)
    }
}

impl From<u8> for Id {
    fn from(numeric_id: u8) -> Self {
        Self::new(u32::from(numeric_id), 0)
    }
}

impl From<u16> for Id {
    fn from(numeric_id: u16) -> Self {
        Self::new(u32::from(numeric_id), 0)
    }
}
