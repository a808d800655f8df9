//! Chunk addressing for the slab allocator

use std::fmt;

/// Packed value meaning "no chunk" in an intrusive link field.
pub const CHUNK_NONE: u64 = u64::MAX;

/// Largest page index a [`ChunkRef`] can encode (24 bits).
pub const MAX_PAGES_PER_CLASS: u32 = 1 << 24;

/// Arena index of one chunk: size class, page within the class, and
/// chunk within the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkRef {
    /// Size class index (0 = smallest)
    pub class: u8,
    /// Page index within the size class
    pub page: u32,
    /// Chunk index within the page
    pub index: u32,
}

impl ChunkRef {
    /// Create a new chunk reference
    pub fn new(class: u8, page: u32, index: u32) -> Self {
        Self { class, page, index }
    }

    /// Get the class index for this chunk
    pub fn class_index(&self) -> usize {
        self.class as usize
    }

    /// Pack into a `u64`: class in the top 8 bits, page in the next 24,
    /// chunk index in the low 32.
    pub fn pack(&self) -> u64 {
        ((self.class as u64) << 56) | (((self.page & 0x00FF_FFFF) as u64) << 32) | self.index as u64
    }

    /// Inverse of [`ChunkRef::pack`].
    pub fn unpack(packed: u64) -> Self {
        Self {
            class: (packed >> 56) as u8,
            page: ((packed >> 32) & 0x00FF_FFFF) as u32,
            index: packed as u32,
        }
    }

    /// Pack an optional link, using [`CHUNK_NONE`] for `None`.
    pub fn pack_link(link: Option<ChunkRef>) -> u64 {
        link.map_or(CHUNK_NONE, |c| c.pack())
    }

    /// Unpack an optional link.
    pub fn unpack_link(packed: u64) -> Option<ChunkRef> {
        if packed == CHUNK_NONE {
            None
        } else {
            Some(Self::unpack(packed))
        }
    }
}

impl fmt::Display for ChunkRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Chunk(class={}, page={}, index={})",
            self.class, self.page, self.index
        )
    }
}
