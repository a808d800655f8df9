//! Raw slab pages and the sources that supply them
//!
//! A page is acquired once, carved into chunks by its size class, and
//! kept until the allocator is dropped. Nothing is ever handed back to
//! the source.

use memmap2::MmapMut;
use thiserror::Error;
use tracing::debug;

/// Why a page source could not supply a page
#[derive(Error, Debug)]
pub enum PageError {
    #[error("page limit of {limit} reached")]
    Exhausted { limit: usize },

    #[error("cannot reserve {len} bytes for a page: {source}")]
    OutOfMemory {
        len: usize,
        source: std::collections::TryReserveError,
    },

    #[error("page mapping failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Backing memory of a slab page
enum PageMemory {
    Heap(Box<[u8]>),
    Mapped(MmapMut),
}

/// An owned, writable region of memory carved into chunks of one size class
pub struct SlabPage {
    mem: PageMemory,
}

impl SlabPage {
    /// Zeroed page from the global allocator
    pub fn heap(len: usize) -> Result<Self, PageError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)
            .map_err(|source| PageError::OutOfMemory { len, source })?;
        buf.resize(len, 0u8);
        Ok(Self {
            mem: PageMemory::Heap(buf.into_boxed_slice()),
        })
    }

    /// Anonymous private mapping; the kernel hands it out zeroed
    pub fn mapped(len: usize) -> std::io::Result<Self> {
        let mmap = MmapMut::map_anon(len)?;
        Ok(Self {
            mem: PageMemory::Mapped(mmap),
        })
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match &self.mem {
            PageMemory::Heap(b) => &b[..],
            PageMemory::Mapped(m) => &m[..],
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match &mut self.mem {
            PageMemory::Heap(b) => &mut b[..],
            PageMemory::Mapped(m) => &mut m[..],
        }
    }

    /// Whether this page is backed by an anonymous mapping
    pub fn is_mapped(&self) -> bool {
        matches!(self.mem, PageMemory::Mapped(_))
    }
}

impl std::fmt::Debug for SlabPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlabPage")
            .field("len", &self.len())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

/// Capability to acquire raw writable memory from the environment
pub trait PageSource: Send {
    /// Acquire a fresh page of exactly `len` bytes.
    fn acquire(&mut self, len: usize) -> Result<SlabPage, PageError>;

    /// Number of pages handed out so far
    fn pages_acquired(&self) -> usize;
}

/// Pages from the global heap, optionally capped
#[derive(Debug, Default)]
pub struct HeapPageSource {
    limit: Option<usize>,
    acquired: usize,
}

impl HeapPageSource {
    pub fn new(limit: Option<usize>) -> Self {
        Self { limit, acquired: 0 }
    }
}

impl PageSource for HeapPageSource {
    fn acquire(&mut self, len: usize) -> Result<SlabPage, PageError> {
        if let Some(limit) = self.limit {
            if self.acquired >= limit {
                return Err(PageError::Exhausted { limit });
            }
        }
        let page = SlabPage::heap(len)?;
        self.acquired += 1;
        debug!(len, acquired = self.acquired, "Acquired heap page");
        Ok(page)
    }

    fn pages_acquired(&self) -> usize {
        self.acquired
    }
}

/// Pages from anonymous memory mappings, optionally capped
#[derive(Debug, Default)]
pub struct MmapPageSource {
    limit: Option<usize>,
    acquired: usize,
}

impl MmapPageSource {
    pub fn new(limit: Option<usize>) -> Self {
        Self { limit, acquired: 0 }
    }
}

impl PageSource for MmapPageSource {
    fn acquire(&mut self, len: usize) -> Result<SlabPage, PageError> {
        if let Some(limit) = self.limit {
            if self.acquired >= limit {
                return Err(PageError::Exhausted { limit });
            }
        }
        let page = SlabPage::mapped(len)?;
        self.acquired += 1;
        debug!(len, acquired = self.acquired, "Mapped anonymous page");
        Ok(page)
    }

    fn pages_acquired(&self) -> usize {
        self.acquired
    }
}
