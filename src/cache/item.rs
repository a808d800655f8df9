//! Inline item layout
//!
//! An item occupies exactly one chunk:
//!
//! ```text
//! 0        8        16          20        24      25       32
//! [ next ][ prev ][ value_len ][ key_len ][ class ][ pad ]
//! [ key bytes ][ 0 ][ value bytes ][ 0 ][ unused chunk tail ... ]
//! ```
//!
//! `next`/`prev` are packed [`ChunkRef`]s linking the item into its
//! bucket chain. All integers are little-endian.

use crate::slab::chunk::ChunkRef;

/// Bytes reserved at the start of every item
pub const ITEM_HEADER_SIZE: usize = 32;

const NEXT_OFFSET: usize = 0;
const PREV_OFFSET: usize = 8;
const VALUE_LEN_OFFSET: usize = 16;
const KEY_LEN_OFFSET: usize = 20;
const CLASS_OFFSET: usize = 24;

/// Chunk bytes needed for an item: header, key, value and both terminators
#[inline]
pub fn item_total_size(key_len: usize, value_len: usize) -> usize {
    ITEM_HEADER_SIZE
        .saturating_add(key_len)
        .saturating_add(value_len)
        .saturating_add(2)
}

/// Decoded item header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemHeader {
    pub next: Option<ChunkRef>,
    pub prev: Option<ChunkRef>,
    pub value_len: u32,
    pub key_len: u32,
    /// Size class owning the chunk
    pub class: u8,
}

impl ItemHeader {
    pub fn read_from(chunk: &[u8]) -> Self {
        Self {
            next: ChunkRef::unpack_link(read_u64(chunk, NEXT_OFFSET)),
            prev: ChunkRef::unpack_link(read_u64(chunk, PREV_OFFSET)),
            value_len: read_u32(chunk, VALUE_LEN_OFFSET),
            key_len: read_u32(chunk, KEY_LEN_OFFSET),
            class: chunk[CLASS_OFFSET],
        }
    }

    pub fn write_to(&self, chunk: &mut [u8]) {
        set_next(chunk, self.next);
        set_prev(chunk, self.prev);
        chunk[VALUE_LEN_OFFSET..VALUE_LEN_OFFSET + 4].copy_from_slice(&self.value_len.to_le_bytes());
        chunk[KEY_LEN_OFFSET..KEY_LEN_OFFSET + 4].copy_from_slice(&self.key_len.to_le_bytes());
        chunk[CLASS_OFFSET] = self.class;
        chunk[CLASS_OFFSET + 1..ITEM_HEADER_SIZE].fill(0);
    }

    /// Bytes this item actually occupies within its chunk
    pub fn total_size(&self) -> usize {
        item_total_size(self.key_len as usize, self.value_len as usize)
    }
}

/// Overwrite the `next` link only
#[inline]
pub fn set_next(chunk: &mut [u8], next: Option<ChunkRef>) {
    chunk[NEXT_OFFSET..NEXT_OFFSET + 8].copy_from_slice(&ChunkRef::pack_link(next).to_le_bytes());
}

/// Overwrite the `prev` link only
#[inline]
pub fn set_prev(chunk: &mut [u8], prev: Option<ChunkRef>) {
    chunk[PREV_OFFSET..PREV_OFFSET + 8].copy_from_slice(&ChunkRef::pack_link(prev).to_le_bytes());
}

/// Key bytes, without terminator
pub fn item_key<'a>(chunk: &'a [u8], header: &ItemHeader) -> &'a [u8] {
    let start = ITEM_HEADER_SIZE;
    &chunk[start..start + header.key_len as usize]
}

/// Value bytes, without terminator
pub fn item_value<'a>(chunk: &'a [u8], header: &ItemHeader) -> &'a [u8] {
    let start = ITEM_HEADER_SIZE + header.key_len as usize + 1;
    &chunk[start..start + header.value_len as usize]
}

/// Write header, key and value (each followed by a `0`) into a chunk
///
/// The chunk must hold at least [`item_total_size`] bytes.
pub fn write_item(chunk: &mut [u8], header: &ItemHeader, key: &[u8], value: &[u8]) {
    debug_assert!(chunk.len() >= item_total_size(key.len(), value.len()));
    header.write_to(chunk);

    let key_start = ITEM_HEADER_SIZE;
    chunk[key_start..key_start + key.len()].copy_from_slice(key);
    chunk[key_start + key.len()] = 0;

    let value_start = key_start + key.len() + 1;
    chunk[value_start..value_start + value.len()].copy_from_slice(value);
    chunk[value_start + value.len()] = 0;
}

#[inline]
fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

#[inline]
fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}
