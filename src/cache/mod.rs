//! Item store
//!
//! # Architecture
//!
//! ```text
//! Cache
//!   ├─→ buckets[hash(key) & mask] → item ⇄ item ⇄ item   (links inside chunks)
//!   └─→ SlabAllocator                → one chunk per item
//!
//! set(k, v):  allocate chunk → unlink+free old item → write → link at head
//! get(k):     walk chain, compare key length then bytes, copy value out
//! ```

pub mod hash;
pub mod item;
pub mod shared;
pub mod store;

pub use hash::{jenkins_one_at_a_time, JenkinsHasher, KeyHasher};
pub use item::{item_total_size, ItemHeader, ITEM_HEADER_SIZE};
pub use shared::SharedCache;
pub use store::{Cache, CacheDump, CacheStats, DumpEntry};
