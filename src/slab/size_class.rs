//! Size class management for slab allocator

use super::chunk::{ChunkRef, MAX_PAGES_PER_CLASS};
use super::page::SlabPage;
use crate::config::MAX_SIZE_CLASSES;

/// A size class hands out fixed-size chunks carved from the pages it owns
///
/// Free chunks sit on an index stack; the most recently freed chunk is
/// reused first.
#[derive(Debug)]
pub struct SizeClass {
    /// Index of this size class
    pub id: u8,
    /// Size of chunks in this class (bytes)
    pub chunk_size: usize,
    /// Chunks carved from each page
    pub chunks_per_page: usize,
    /// Pages owned by this class, never released
    pages: Vec<SlabPage>,
    /// Free chunk stack
    free: Vec<ChunkRef>,
    /// Allocation bit per chunk, indexed by `page * chunks_per_page + index`
    in_use: Vec<bool>,
}

impl SizeClass {
    /// Create an empty size class
    pub fn new(id: u8, chunk_size: usize, page_size: usize) -> Self {
        Self {
            id,
            chunk_size,
            chunks_per_page: page_size / chunk_size,
            pages: Vec::new(),
            free: Vec::new(),
            in_use: Vec::new(),
        }
    }

    /// Whether another page can still be addressed by a [`ChunkRef`]
    pub fn can_grow(&self) -> bool {
        (self.pages.len() as u64) < MAX_PAGES_PER_CLASS as u64
    }

    /// Take ownership of a page and split it into chunks on the free stack
    ///
    /// Chunks are pushed high-to-low so the lowest address is handed out first.
    pub fn grow(&mut self, page: SlabPage) {
        let id = self.id;
        let page_idx = self.pages.len() as u32;
        self.pages.push(page);
        self.in_use
            .resize(self.in_use.len() + self.chunks_per_page, false);
        self.free.extend(
            (0..self.chunks_per_page as u32)
                .rev()
                .map(|index| ChunkRef::new(id, page_idx, index)),
        );
    }

    /// Pop a chunk off the free stack
    pub fn pop_free(&mut self) -> Option<ChunkRef> {
        let chunk = self.free.pop()?;
        let bit = self.bit(chunk);
        self.in_use[bit] = true;
        Some(chunk)
    }

    /// Return a chunk to the free stack
    ///
    /// Returns `false` if the chunk does not belong to this class or is
    /// already free.
    pub fn push_free(&mut self, chunk: ChunkRef) -> bool {
        if !self.contains(chunk) {
            return false;
        }
        let bit = self.bit(chunk);
        if !self.in_use[bit] {
            return false;
        }
        self.in_use[bit] = false;
        self.free.push(chunk);
        true
    }

    /// Whether `chunk` names a chunk carved from this class's pages
    pub fn contains(&self, chunk: ChunkRef) -> bool {
        chunk.class == self.id
            && (chunk.page as usize) < self.pages.len()
            && (chunk.index as usize) < self.chunks_per_page
    }

    /// Whether `chunk` is currently handed out
    pub fn is_allocated(&self, chunk: ChunkRef) -> bool {
        self.contains(chunk) && self.in_use[self.bit(chunk)]
    }

    /// Bytes of one chunk
    pub fn chunk(&self, chunk: ChunkRef) -> Option<&[u8]> {
        if !self.contains(chunk) {
            return None;
        }
        let start = chunk.index as usize * self.chunk_size;
        self.pages[chunk.page as usize]
            .as_slice()
            .get(start..start + self.chunk_size)
    }

    /// Mutable bytes of one chunk
    pub fn chunk_mut(&mut self, chunk: ChunkRef) -> Option<&mut [u8]> {
        if !self.contains(chunk) {
            return None;
        }
        let start = chunk.index as usize * self.chunk_size;
        let size = self.chunk_size;
        self.pages[chunk.page as usize]
            .as_mut_slice()
            .get_mut(start..start + size)
    }

    /// Get the number of free chunks
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Get the number of pages owned
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Get the total number of chunks carved (including free)
    pub fn total_chunks(&self) -> usize {
        self.pages.len() * self.chunks_per_page
    }

    /// Chunks currently handed out
    pub fn used_chunks(&self) -> usize {
        self.total_chunks() - self.free_count()
    }

    /// Bytes held by handed-out chunks
    pub fn used_bytes(&self) -> u64 {
        self.used_chunks() as u64 * self.chunk_size as u64
    }

    /// Check if a given size fits in this size class
    pub fn can_fit(&self, size: usize) -> bool {
        size <= self.chunk_size
    }

    fn bit(&self, chunk: ChunkRef) -> usize {
        chunk.page as usize * self.chunks_per_page + chunk.index as usize
    }
}

/// Calculate the class ladder: start at `min_size`, multiply by `factor`
/// until the size exceeds `max_size`
///
/// Every step grows by at least one byte, so the ladder is strictly
/// increasing even for factors close to 1.
pub fn calculate_size_classes(min_size: usize, max_size: usize, factor: f64) -> Vec<usize> {
    let mut classes = Vec::new();
    let mut current = min_size.max(1);

    // Stops one class past the cap; validate() rejects such ladders
    while current <= max_size && classes.len() <= MAX_SIZE_CLASSES {
        classes.push(current);
        let next = (current as f64 * factor).ceil() as usize;
        current = next.max(current + 1);
    }

    classes
}
