//! Slab Allocator
//!
//! Carves large pages into fixed-size chunks organized by size class,
//! so cache items never need their own heap allocation.
//!
//! # Architecture
//!
//! ```text
//! SlabAllocator
//!   ├─→ SizeClass(32B)    → pages: []        free: []
//!   ├─→ SizeClass(64B)    → pages: [8 MiB]   free: [0, 1, 2, ...]
//!   ├─→ SizeClass(128B)   → pages: []        free: []
//!   └─→ SizeClass(16KiB)  → pages: []        free: []
//!
//! PageSource (heap or anonymous mmap)
//!   └─→ one page per grow, never returned
//! ```
//!
//! Chunks are addressed by [`ChunkRef`] (class, page, index) rather than
//! by pointer; a per-class bitmap rejects double frees.

pub mod allocator;
pub mod chunk;
pub mod page;
pub mod size_class;

pub use allocator::{SizeClassStats, SlabAllocator, SlabStats};
pub use chunk::ChunkRef;
pub use page::{HeapPageSource, MmapPageSource, PageError, PageSource, SlabPage};
pub use size_class::{calculate_size_classes, SizeClass};
