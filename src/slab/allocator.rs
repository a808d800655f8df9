//! Slab allocator implementation

use super::chunk::ChunkRef;
use super::page::PageSource;
use super::size_class::SizeClass;
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use tracing::{debug, info, trace, warn};

/// Slab allocator over in-memory pages
///
/// Manages multiple size classes, each carving its own pages into
/// fixed-size chunks. An exhausted class grows by one page on demand.
pub struct SlabAllocator {
    /// Size classes (sorted by chunk size)
    size_classes: Vec<SizeClass>,
    /// Bytes per page
    page_size: usize,
    /// Supplies raw pages
    source: Box<dyn PageSource>,
}

impl SlabAllocator {
    /// Build the class ladder and pre-warm one page for the configured class
    ///
    /// Fails with [`Error::InitFailed`] if the warm page cannot be acquired.
    pub fn new(config: &CacheConfig, source: Box<dyn PageSource>) -> Result<Self> {
        config.validate()?;

        let sizes = config.size_classes();
        info!(
            classes = sizes.len(),
            page_size = config.page_size,
            "Initializing slab allocator with size classes: {:?}",
            sizes
        );

        let size_classes = sizes
            .iter()
            .enumerate()
            .map(|(index, &size)| SizeClass::new(index as u8, size, config.page_size))
            .collect();

        let mut allocator = Self {
            size_classes,
            page_size: config.page_size,
            source,
        };

        if let Some(warm) = config.warm_size {
            let class = allocator.class_for(warm)?;
            allocator.grow(class).map_err(|e| {
                Error::InitFailed(format!("Failed to pre-allocate warm page: {}", e))
            })?;
            debug!(class, warm_size = warm, "Pre-allocated warm page");
        }

        Ok(allocator)
    }

    /// Find the smallest class whose chunks hold `size` bytes
    pub fn class_for(&self, size: usize) -> Result<u8> {
        let idx = self
            .size_classes
            .partition_point(|sc| sc.chunk_size < size);
        if size == 0 || idx == self.size_classes.len() {
            return Err(Error::NoClassFits {
                size,
                max: self.max_chunk_size(),
            });
        }
        Ok(idx as u8)
    }

    /// Chunk size of a class
    pub fn chunk_size(&self, class: u8) -> Option<usize> {
        self.size_classes.get(class as usize).map(|sc| sc.chunk_size)
    }

    /// Largest chunk size in the ladder
    pub fn max_chunk_size(&self) -> usize {
        self.size_classes.last().map_or(0, |sc| sc.chunk_size)
    }

    /// Number of size classes
    pub fn class_count(&self) -> usize {
        self.size_classes.len()
    }

    /// Bytes per page
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Allocate a chunk big enough for `size` bytes
    ///
    /// Pops the class's free stack; when it is empty the class first grows
    /// by one page.
    pub fn allocate(&mut self, size: usize) -> Result<ChunkRef> {
        let class = self.class_for(size)?;

        if self.size_classes[class as usize].free_count() == 0 {
            self.grow(class)?;
        }

        let sc = &mut self.size_classes[class as usize];
        let chunk = sc.pop_free().ok_or_else(|| Error::AllocFailed {
            class,
            chunk_size: sc.chunk_size,
            reason: "free list empty after growth".into(),
        })?;

        trace!(size, %chunk, "Allocated chunk");
        Ok(chunk)
    }

    /// Return a chunk to its class
    pub fn free(&mut self, chunk: ChunkRef) -> Result<()> {
        let sc = self
            .size_classes
            .get_mut(chunk.class_index())
            .ok_or_else(|| Error::InvalidChunk(format!("{}: no such size class", chunk)))?;

        if !sc.push_free(chunk) {
            return Err(Error::InvalidChunk(format!(
                "{} is not an allocated chunk",
                chunk
            )));
        }

        trace!(%chunk, "Freed chunk");
        Ok(())
    }

    /// Bytes of an allocated or free chunk
    pub fn chunk(&self, chunk: ChunkRef) -> Result<&[u8]> {
        self.size_classes
            .get(chunk.class_index())
            .and_then(|sc| sc.chunk(chunk))
            .ok_or_else(|| Error::InvalidChunk(chunk.to_string()))
    }

    /// Mutable bytes of a chunk
    pub fn chunk_mut(&mut self, chunk: ChunkRef) -> Result<&mut [u8]> {
        self.size_classes
            .get_mut(chunk.class_index())
            .and_then(|sc| sc.chunk_mut(chunk))
            .ok_or_else(|| Error::InvalidChunk(chunk.to_string()))
    }

    /// Whether `chunk` is currently handed out
    pub fn is_allocated(&self, chunk: ChunkRef) -> bool {
        self.size_classes
            .get(chunk.class_index())
            .is_some_and(|sc| sc.is_allocated(chunk))
    }

    /// Bytes held by handed-out chunks across every class
    ///
    /// Page tail slack left over after carving is not counted here; it shows
    /// up in [`memory_reserved`](Self::memory_reserved).
    pub fn memory_used(&self) -> u64 {
        self.size_classes.iter().map(SizeClass::used_bytes).sum()
    }

    /// Bytes of pages acquired from the page source
    pub fn memory_reserved(&self) -> u64 {
        self.size_classes
            .iter()
            .map(|sc| sc.page_count() as u64 * self.page_size as u64)
            .sum()
    }

    /// Get statistics about the allocator
    pub fn stats(&self) -> SlabStats {
        let mut stats = SlabStats::default();

        for sc in &self.size_classes {
            stats.size_classes.push(SizeClassStats {
                index: sc.id,
                chunk_size: sc.chunk_size,
                chunks_per_page: sc.chunks_per_page,
                pages: sc.page_count(),
                total_chunks: sc.total_chunks(),
                free_chunks: sc.free_count(),
                used_chunks: sc.used_chunks(),
            });
        }
        stats.memory_used = self.memory_used();
        stats.memory_reserved = self.memory_reserved();

        stats
    }

    /// Acquire one page for `class` and put its chunks on the free stack
    fn grow(&mut self, class: u8) -> Result<()> {
        let page_size = self.page_size;
        let sc = &mut self.size_classes[class as usize];
        let chunk_size = sc.chunk_size;

        if !sc.can_grow() {
            return Err(Error::AllocFailed {
                class,
                chunk_size,
                reason: "page index space exhausted".into(),
            });
        }

        let page = self.source.acquire(page_size).map_err(|e| {
            warn!(class, chunk_size, error = %e, "Page acquisition failed");
            Error::AllocFailed {
                class,
                chunk_size,
                reason: e.to_string(),
            }
        })?;

        sc.grow(page);
        debug!(
            class,
            chunk_size = sc.chunk_size,
            pages = sc.page_count(),
            free = sc.free_count(),
            "Grew size class by one page"
        );
        Ok(())
    }
}

impl std::fmt::Debug for SlabAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlabAllocator")
            .field("page_size", &self.page_size)
            .field("classes", &self.size_classes.len())
            .field("pages_acquired", &self.source.pages_acquired())
            .finish()
    }
}

/// Statistics for the slab allocator
#[derive(Debug, Default, Clone)]
pub struct SlabStats {
    pub size_classes: Vec<SizeClassStats>,
    /// Bytes held by live chunks
    pub memory_used: u64,
    /// Bytes of pages owned
    pub memory_reserved: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClassStats {
    pub index: u8,
    pub chunk_size: usize,
    pub chunks_per_page: usize,
    pub pages: usize,
    pub total_chunks: usize,
    pub free_chunks: usize,
    pub used_chunks: usize,
}
