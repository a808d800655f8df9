//! Item store: a fixed-size chained hash table over slab chunks
//!
//! Each bucket holds the head of a doubly-linked chain of items. The
//! links live inside the items themselves, so the chain costs nothing
//! beyond the chunk the item already occupies.

use super::hash::{JenkinsHasher, KeyHasher};
use super::item::{item_key, item_total_size, item_value, set_next, set_prev, write_item, ItemHeader};
use crate::config::{CacheConfig, PageSourceKind};
use crate::error::{Error, Result};
use crate::slab::{ChunkRef, HeapPageSource, MmapPageSource, PageSource, SlabAllocator, SlabStats};
use std::fmt;
use tracing::{debug, info};

/// Single-owner key-value cache
///
/// Not internally synchronized; wrap it in [`SharedCache`](super::SharedCache)
/// to share it across threads.
pub struct Cache {
    config: CacheConfig,
    /// Bucket heads, `2^hash_power` of them
    buckets: Vec<Option<ChunkRef>>,
    mask: u32,
    allocator: SlabAllocator,
    hasher: Box<dyn KeyHasher>,
    len: usize,
    stats: CacheStats,
}

impl Cache {
    /// Build the hash table and the slab allocator described by `config`
    pub fn new(config: CacheConfig) -> Result<Self> {
        let source: Box<dyn PageSource> = match config.page_source {
            PageSourceKind::Heap => Box::new(HeapPageSource::new(config.max_pages)),
            PageSourceKind::Mmap => Box::new(MmapPageSource::new(config.max_pages)),
        };
        Self::with_parts(config, source, Box::new(JenkinsHasher))
    }

    /// Build a cache with an explicit page source and hash function
    pub fn with_parts(
        config: CacheConfig,
        source: Box<dyn PageSource>,
        hasher: Box<dyn KeyHasher>,
    ) -> Result<Self> {
        config.validate()?;

        let bucket_count = config.bucket_count();
        let mut buckets = Vec::new();
        buckets.try_reserve_exact(bucket_count).map_err(|e| {
            Error::InitFailed(format!(
                "Failed to allocate {} hash buckets: {}",
                bucket_count, e
            ))
        })?;
        buckets.resize(bucket_count, None);

        let allocator = SlabAllocator::new(&config, source)?;

        info!(
            buckets = bucket_count,
            classes = allocator.class_count(),
            "Cache initialized"
        );

        Ok(Self {
            mask: (bucket_count - 1) as u32,
            config,
            buckets,
            allocator,
            hasher,
            len: 0,
            stats: CacheStats::default(),
        })
    }

    /// Configuration the cache was built with
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get a copy of the value stored under `key`
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let Some((chunk, header)) = self.lookup(key)? else {
            return Ok(None);
        };
        let bytes = self.allocator.chunk(chunk)?;
        Ok(Some(item_value(bytes, &header).to_vec()))
    }

    /// Copy the value under `key` into `out`, truncating to fit
    ///
    /// At most `out.len() - 1` value bytes are copied and a `0` is written
    /// right after them, so nothing past `out.len()` is ever touched.
    /// Returns the number of value bytes copied.
    pub fn get_into(&mut self, key: &[u8], out: &mut [u8]) -> Result<Option<usize>> {
        let Some((chunk, header)) = self.lookup(key)? else {
            return Ok(None);
        };
        if out.is_empty() {
            return Ok(Some(0));
        }

        let value = item_value(self.allocator.chunk(chunk)?, &header);
        let n = value.len().min(out.len() - 1);
        out[..n].copy_from_slice(&value[..n]);
        out[n] = 0;
        Ok(Some(n))
    }

    /// Whether `key` is present
    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.find(self.bucket_index(key), key)?.is_some())
    }

    /// Store `value` under `key`, replacing any previous value
    ///
    /// The replacement chunk is allocated before the old item is touched:
    /// if allocation fails the old value stays in place and the error is
    /// returned. On success the old chunk goes straight back to its class.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let total = item_total_size(key.len(), value.len());
        let bucket = self.bucket_index(key);
        let existing = self.find(bucket, key)?;

        let allocated = self
            .encode_lengths(key, value, total)
            .and_then(|_| self.allocator.allocate(total));
        let chunk = match allocated {
            Ok(chunk) => chunk,
            Err(e) => {
                self.stats.set_failures += 1;
                metrics::counter!("slabcache_set_failures_total").increment(1);
                debug!(key_len = key.len(), value_len = value.len(), error = %e, "Set failed");
                return Err(e);
            }
        };

        if let Some((old, old_header)) = existing {
            self.unlink(bucket, &old_header)?;
            self.allocator.free(old)?;
            self.len -= 1;
        }

        let head = self.buckets[bucket];
        let header = ItemHeader {
            next: head,
            prev: None,
            value_len: value.len() as u32,
            key_len: key.len() as u32,
            class: chunk.class,
        };
        write_item(self.allocator.chunk_mut(chunk)?, &header, key, value);
        if let Some(head) = head {
            set_prev(self.allocator.chunk_mut(head)?, Some(chunk));
        }
        self.buckets[bucket] = Some(chunk);
        self.len += 1;
        self.stats.sets += 1;

        metrics::counter!("slabcache_sets_total").increment(1);
        debug!(
            key_len = key.len(),
            value_len = value.len(),
            replaced = existing.is_some(),
            %chunk,
            "Set key-value"
        );
        Ok(())
    }

    /// Remove `key`; returns whether it was present
    pub fn remove(&mut self, key: &[u8]) -> Result<bool> {
        let bucket = self.bucket_index(key);
        let Some((chunk, header)) = self.find(bucket, key)? else {
            return Ok(false);
        };

        self.unlink(bucket, &header)?;
        self.allocator.free(chunk)?;
        self.len -= 1;
        self.stats.removes += 1;

        debug!(key_len = key.len(), %chunk, "Removed key");
        Ok(true)
    }

    /// Remove `key`, failing with [`Error::NotFound`] if it is absent
    pub fn remove_strict(&mut self, key: &[u8]) -> Result<()> {
        if self.remove(key)? {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    /// Drop every item; slab pages stay with their classes
    pub fn flush_all(&mut self) -> Result<()> {
        let mut freed = 0usize;
        for bucket in 0..self.buckets.len() {
            let mut cur = self.buckets[bucket].take();
            while let Some(chunk) = cur {
                cur = ItemHeader::read_from(self.allocator.chunk(chunk)?).next;
                self.allocator.free(chunk)?;
                freed += 1;
            }
        }
        self.len = 0;
        self.stats.flushes += 1;

        info!(freed, "Flushed cache");
        Ok(())
    }

    /// Walk every item in bucket order
    pub fn dump(&self) -> Result<CacheDump> {
        let mut entries = Vec::with_capacity(self.len);
        let mut item_bytes = 0u64;

        for (bucket, head) in self.buckets.iter().enumerate() {
            let mut cur = *head;
            while let Some(chunk) = cur {
                let bytes = self.allocator.chunk(chunk)?;
                let header = ItemHeader::read_from(bytes);
                let value = item_value(bytes, &header);

                item_bytes += header.total_size() as u64;
                entries.push(DumpEntry {
                    bucket,
                    key: item_key(bytes, &header).to_vec(),
                    value_preview: value[..value.len().min(DUMP_PREVIEW_LEN)].to_vec(),
                    total_size: header.total_size(),
                });
                cur = header.next;
            }
        }

        Ok(CacheDump {
            entries,
            item_bytes,
            memory_used: self.allocator.memory_used(),
        })
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes held by live items' chunks
    pub fn memory_used(&self) -> u64 {
        self.allocator.memory_used()
    }

    /// Operation counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            items: self.len,
            ..self.stats
        }
    }

    /// Per-class allocator statistics
    pub fn slab_stats(&self) -> SlabStats {
        self.allocator.stats()
    }

    /// The underlying allocator
    pub fn allocator(&self) -> &SlabAllocator {
        &self.allocator
    }

    /// Number of hash buckets
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Head of a bucket chain
    pub fn bucket_head(&self, bucket: usize) -> Option<ChunkRef> {
        self.buckets.get(bucket).copied().flatten()
    }

    /// Bucket `key` hashes to
    pub fn bucket_index(&self, key: &[u8]) -> usize {
        (self.hasher.hash(key) & self.mask) as usize
    }

    /// Find an item and record the hit or miss
    fn lookup(&mut self, key: &[u8]) -> Result<Option<(ChunkRef, ItemHeader)>> {
        self.stats.gets += 1;
        let found = self.find(self.bucket_index(key), key)?;
        if found.is_some() {
            self.stats.hits += 1;
            metrics::counter!("slabcache_get_hits_total").increment(1);
        } else {
            self.stats.misses += 1;
            metrics::counter!("slabcache_get_misses_total").increment(1);
        }
        Ok(found)
    }

    /// Walk a bucket chain comparing key length, then key bytes
    fn find(&self, bucket: usize, key: &[u8]) -> Result<Option<(ChunkRef, ItemHeader)>> {
        let mut cur = self.buckets[bucket];
        while let Some(chunk) = cur {
            let bytes = self.allocator.chunk(chunk)?;
            let header = ItemHeader::read_from(bytes);
            if header.key_len as usize == key.len() && item_key(bytes, &header) == key {
                return Ok(Some((chunk, header)));
            }
            cur = header.next;
        }
        Ok(None)
    }

    /// Splice an item out of its bucket chain
    fn unlink(&mut self, bucket: usize, header: &ItemHeader) -> Result<()> {
        match header.prev {
            None => self.buckets[bucket] = header.next,
            Some(prev) => set_next(self.allocator.chunk_mut(prev)?, header.next),
        }
        if let Some(next) = header.next {
            set_prev(self.allocator.chunk_mut(next)?, header.prev);
        }
        Ok(())
    }

    /// Lengths are stored as `u32` in the item header
    fn encode_lengths(&self, key: &[u8], value: &[u8], total: usize) -> Result<()> {
        if u32::try_from(key.len()).is_err() || u32::try_from(value.len()).is_err() {
            return Err(Error::NoClassFits {
                size: total,
                max: self.allocator.max_chunk_size(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("len", &self.len)
            .field("buckets", &self.buckets.len())
            .field("allocator", &self.allocator)
            .finish()
    }
}

/// Value bytes shown per item in a dump
pub const DUMP_PREVIEW_LEN: usize = 3;

/// Cache operation counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub items: usize,
    pub gets: u64,
    pub hits: u64,
    pub misses: u64,
    /// Successful stores
    pub sets: u64,
    pub set_failures: u64,
    pub removes: u64,
    pub flushes: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.gets == 0 {
            0.0
        } else {
            self.hits as f64 / self.gets as f64
        }
    }
}

/// One item in a [`CacheDump`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpEntry {
    pub bucket: usize,
    pub key: Vec<u8>,
    /// First [`DUMP_PREVIEW_LEN`] bytes of the value
    pub value_preview: Vec<u8>,
    /// Header plus key, value and terminators
    pub total_size: usize,
}

/// Snapshot of every item, in bucket order
#[derive(Debug, Clone, Default)]
pub struct CacheDump {
    pub entries: Vec<DumpEntry>,
    /// Sum of item sizes
    pub item_bytes: u64,
    /// Chunk bytes in use, as reported by the allocator
    pub memory_used: u64,
}

impl fmt::Display for CacheDump {
    /// One line per non-empty bucket: `key = val, key = val`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut iter = self.entries.iter().peekable();
        while let Some(entry) = iter.next() {
            write!(
                f,
                "{} = {}",
                String::from_utf8_lossy(&entry.key),
                String::from_utf8_lossy(&entry.value_preview)
            )?;
            match iter.peek() {
                Some(next) if next.bucket == entry.bucket => write!(f, ", ")?,
                _ => writeln!(f)?,
            }
        }
        write!(
            f,
            "Used {} bytes ({} bytes in chunks)",
            self.item_bytes, self.memory_used
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CacheConfig {
        CacheConfig {
            page_size: 64 * 1024,
            hash_power: 4,
            ..Default::default()
        }
    }

    /// Sends every key to bucket 0
    struct ConstantHasher;

    impl KeyHasher for ConstantHasher {
        fn hash(&self, _key: &[u8]) -> u32 {
            0
        }
    }

    fn colliding_cache() -> Result<Cache> {
        Cache::with_parts(
            test_config(),
            Box::new(HeapPageSource::new(None)),
            Box::new(ConstantHasher),
        )
    }

    #[test]
    fn test_cache_basic() -> Result<()> {
        let mut cache = Cache::new(test_config())?;

        cache.set(b"key1", b"value1")?;
        cache.set(b"key2", b"value2")?;

        assert_eq!(cache.get(b"key1")?, Some(b"value1".to_vec()));
        assert_eq!(cache.get(b"key2")?, Some(b"value2".to_vec()));
        assert_eq!(cache.get(b"key3")?, None);
        assert!(cache.contains_key(b"key1")?);
        assert_eq!(cache.len(), 2);

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 2);
        assert_eq!(stats.items, 2);
        Ok(())
    }

    #[test]
    fn test_cache_overwrite_frees_old_chunk() -> Result<()> {
        let mut cache = Cache::new(test_config())?;

        cache.set(b"k", b"small")?;
        let first = cache.bucket_head(cache.bucket_index(b"k")).unwrap();
        assert_eq!(cache.memory_used(), 64);

        cache.set(b"k", &[b'x'; 200])?;
        assert!(!cache.allocator().is_allocated(first));
        assert_eq!(cache.memory_used(), 256);
        assert_eq!(cache.get(b"k")?, Some(vec![b'x'; 200]));
        assert_eq!(cache.len(), 1);
        Ok(())
    }

    #[test]
    fn test_cache_overwrite_same_size_moves_chunk() -> Result<()> {
        let mut cache = Cache::new(test_config())?;

        cache.set(b"k", b"one")?;
        let first = cache.bucket_head(cache.bucket_index(b"k")).unwrap();
        cache.set(b"k", b"two")?;
        let second = cache.bucket_head(cache.bucket_index(b"k")).unwrap();

        assert_ne!(first, second);
        assert!(!cache.allocator().is_allocated(first));
        assert_eq!(cache.get(b"k")?, Some(b"two".to_vec()));
        Ok(())
    }

    #[test]
    fn test_failed_set_keeps_old_value() -> Result<()> {
        let mut cache = Cache::new(test_config())?;
        cache.set(b"k", b"keep me")?;

        let err = cache.set(b"k", &vec![0u8; 20_000]).unwrap_err();
        assert!(matches!(err, Error::NoClassFits { .. }));
        assert_eq!(cache.get(b"k")?, Some(b"keep me".to_vec()));
        assert_eq!(cache.stats().set_failures, 1);
        Ok(())
    }

    #[test]
    fn test_failed_growth_keeps_old_value() -> Result<()> {
        let config = CacheConfig {
            max_pages: Some(1),
            ..test_config()
        };
        let mut cache = Cache::new(config)?;
        cache.set(b"k", b"v")?;

        // 1 KiB class has no page and none can be acquired
        let err = cache.set(b"k", &[7u8; 900]).unwrap_err();
        assert!(matches!(err, Error::AllocFailed { chunk_size: 1024, .. }));
        assert_eq!(cache.get(b"k")?, Some(b"v".to_vec()));
        Ok(())
    }

    #[test]
    fn test_get_into_truncates() -> Result<()> {
        let mut cache = Cache::new(test_config())?;
        cache.set(b"k", b"hello world")?;

        let mut buf = [0xFFu8; 6];
        assert_eq!(cache.get_into(b"k", &mut buf)?, Some(5));
        assert_eq!(&buf, b"hello\0");

        let mut big = [0xFFu8; 32];
        assert_eq!(cache.get_into(b"k", &mut big)?, Some(11));
        assert_eq!(&big[..12], b"hello world\0");
        assert_eq!(big[12], 0xFF);

        let mut empty: [u8; 0] = [];
        assert_eq!(cache.get_into(b"k", &mut empty)?, Some(0));

        let mut one = [0xFFu8; 1];
        assert_eq!(cache.get_into(b"k", &mut one)?, Some(0));
        assert_eq!(one, [0]);

        assert_eq!(cache.get_into(b"missing", &mut buf)?, None);
        Ok(())
    }

    #[test]
    fn test_remove() -> Result<()> {
        let mut cache = Cache::new(test_config())?;
        cache.set(b"key1", b"value1")?;

        assert!(cache.remove(b"key1")?);
        assert!(!cache.remove(b"key1")?);
        assert_eq!(cache.get(b"key1")?, None);
        assert!(matches!(cache.remove_strict(b"key1"), Err(Error::NotFound)));
        assert_eq!(cache.memory_used(), 0);
        assert!(cache.is_empty());
        Ok(())
    }

    #[test]
    fn test_chain_unlink_head_middle_tail() -> Result<()> {
        let mut cache = colliding_cache()?;
        for k in [b"a", b"b", b"c", b"d", b"e"] {
            cache.set(k, k)?;
        }
        // Chain is LIFO: e d c b a

        assert!(cache.remove(b"c")?); // middle
        assert!(cache.remove(b"e")?); // head
        assert!(cache.remove(b"a")?); // tail

        assert_eq!(cache.get(b"b")?, Some(b"b".to_vec()));
        assert_eq!(cache.get(b"d")?, Some(b"d".to_vec()));
        for k in [b"a", b"c", b"e"] {
            assert_eq!(cache.get(k)?, None);
        }

        let dump = cache.dump()?;
        let keys: Vec<_> = dump.entries.iter().map(|e| e.key.clone()).collect();
        assert_eq!(keys, vec![b"d".to_vec(), b"b".to_vec()]);
        Ok(())
    }

    #[test]
    fn test_colliding_keys_are_independent() -> Result<()> {
        let mut cache = colliding_cache()?;
        cache.set(b"ab", b"first")?;
        cache.set(b"ba", b"second")?;
        cache.set(b"abc", b"third")?;

        assert_eq!(cache.get(b"ab")?, Some(b"first".to_vec()));
        assert_eq!(cache.get(b"ba")?, Some(b"second".to_vec()));
        assert_eq!(cache.get(b"abc")?, Some(b"third".to_vec()));

        cache.set(b"ba", b"changed")?;
        assert_eq!(cache.get(b"ab")?, Some(b"first".to_vec()));
        assert_eq!(cache.get(b"ba")?, Some(b"changed".to_vec()));
        Ok(())
    }

    #[test]
    fn test_empty_key_and_value() -> Result<()> {
        let mut cache = Cache::new(test_config())?;
        cache.set(b"", b"")?;
        assert_eq!(cache.get(b"")?, Some(Vec::new()));

        cache.set(b"k", b"")?;
        assert_eq!(cache.get(b"k")?, Some(Vec::new()));
        Ok(())
    }

    #[test]
    fn test_flush_all() -> Result<()> {
        let mut cache = Cache::new(test_config())?;
        for i in 0..50 {
            cache.set(format!("key_{}", i).as_bytes(), b"v")?;
        }
        let reserved = cache.slab_stats().memory_reserved;

        cache.flush_all()?;

        assert_eq!(cache.len(), 0);
        assert_eq!(cache.memory_used(), 0);
        assert_eq!(cache.slab_stats().memory_reserved, reserved);
        assert!((0..cache.bucket_count()).all(|b| cache.bucket_head(b).is_none()));
        for i in 0..50 {
            assert_eq!(cache.get(format!("key_{}", i).as_bytes())?, None);
        }

        // Usable again afterwards
        cache.set(b"after", b"flush")?;
        assert_eq!(cache.get(b"after")?, Some(b"flush".to_vec()));
        Ok(())
    }

    #[test]
    fn test_dump_format() -> Result<()> {
        let mut cache = colliding_cache()?;
        cache.set(b"one", b"11111")?;
        cache.set(b"two", b"22")?;

        let dump = cache.dump()?;
        assert_eq!(dump.entries.len(), 2);
        assert_eq!(dump.entries[0].value_preview, b"22".to_vec());
        assert_eq!(dump.entries[1].value_preview, b"111".to_vec());
        assert_eq!(
            dump.item_bytes,
            (32 + 3 + 1 + 2 + 1 + 32 + 3 + 1 + 5 + 1) as u64
        );
        assert_eq!(dump.memory_used, 128);
        assert_eq!(
            dump.to_string(),
            "two = 22, one = 111\nUsed 81 bytes (128 bytes in chunks)"
        );
        Ok(())
    }

    #[test]
    fn test_mmap_backed_cache() -> Result<()> {
        let config = CacheConfig {
            page_source: PageSourceKind::Mmap,
            ..test_config()
        };
        let mut cache = Cache::new(config)?;
        cache.set(b"mapped", b"value")?;
        assert_eq!(cache.get(b"mapped")?, Some(b"value".to_vec()));
        Ok(())
    }

    #[test]
    fn test_heap_cache_init_out_of_memory() {
        let config = CacheConfig {
            page_size: 1 << 60,
            min_size: 1 << 30,
            max_size: 1 << 30,
            ..Default::default()
        };
        assert!(matches!(Cache::new(config), Err(Error::InitFailed(_))));
    }

    #[test]
    fn test_heap_cache_set_out_of_memory() -> Result<()> {
        let mut cache = Cache::new(CacheConfig {
            page_size: 1 << 60,
            min_size: 1 << 30,
            max_size: 1 << 30,
            warm_size: None,
            ..Default::default()
        })?;

        assert!(matches!(
            cache.set(b"key", b"value"),
            Err(Error::AllocFailed { .. })
        ));
        assert_eq!(cache.get(b"key")?, None);

        let stats = cache.stats();
        assert_eq!(stats.sets, 0);
        assert_eq!(stats.set_failures, 1);
        Ok(())
    }
}
