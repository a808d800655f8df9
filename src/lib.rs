// slabcache - In-process key-value cache over a size-classed slab allocator

#![warn(rust_2018_idioms)]

pub mod cache;
pub mod config;
pub mod slab;

// Re-exports for convenience
pub use crate::cache::{Cache, CacheDump, CacheStats, SharedCache};
pub use crate::config::{CacheConfig, PageSourceKind};
pub use crate::slab::{ChunkRef, SlabAllocator};

/// slabcache error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Not found")]
        NotFound,

        #[error("No size class fits {size} bytes (largest is {max})")]
        NoClassFits { size: usize, max: usize },

        #[error("Allocation failed in class {class} ({chunk_size}B chunks): {reason}")]
        AllocFailed {
            class: u8,
            chunk_size: usize,
            reason: String,
        },

        #[error("Initialization failed: {0}")]
        InitFailed(String),

        #[error("Invalid chunk: {0}")]
        InvalidChunk(String),

        #[error("Invalid configuration: {0}")]
        InvalidConfig(String),

        #[error("Configuration error: {0}")]
        Config(String),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
