//! End-to-end properties of the cache: round-trips, overwrites, flushes
//! and the size-class ladder

use proptest::prelude::*;
use slabcache::cache::{item_total_size, KeyHasher};
use slabcache::error::{Error, Result};
use slabcache::slab::{HeapPageSource, SlabAllocator};
use slabcache::{Cache, CacheConfig};

fn small_pages() -> CacheConfig {
    CacheConfig {
        page_size: 64 * 1024,
        ..Default::default()
    }
}

#[test]
fn test_ladder_scenario() -> Result<()> {
    let config = CacheConfig {
        min_size: 32,
        growth_factor: 2.0,
        max_size: 16384,
        ..small_pages()
    };
    let allocator = SlabAllocator::new(&config, Box::new(HeapPageSource::new(None)))?;

    for (request, expected) in [(1, 32), (32, 32), (33, 64), (64, 64), (16384, 16384)] {
        let class = allocator.class_for(request)?;
        assert_eq!(allocator.chunk_size(class), Some(expected), "request {}", request);
    }
    assert!(matches!(
        allocator.class_for(16385),
        Err(Error::NoClassFits { .. })
    ));
    Ok(())
}

#[test]
fn test_thousand_keys_insert_then_remove() -> Result<()> {
    let mut cache = Cache::new(CacheConfig {
        hash_power: 10,
        ..small_pages()
    })?;
    assert_eq!(cache.bucket_count(), 1024);

    for i in 0..1000 {
        let key = format!("key_{}", i);
        let value = format!("value_{}", i);
        cache.set(key.as_bytes(), value.as_bytes())?;
    }
    assert_eq!(cache.len(), 1000);
    assert!(cache.memory_used() > 0);

    for i in 0..1000 {
        assert!(cache.remove(format!("key_{}", i).as_bytes())?);
    }

    assert_eq!(cache.memory_used(), 0);
    assert!((0..cache.bucket_count()).all(|b| cache.bucket_head(b).is_none()));
    assert!(cache.is_empty());
    Ok(())
}

#[test]
fn test_overwrite_reflects_only_new_class() -> Result<()> {
    let mut cache = Cache::new(small_pages())?;

    cache.set(b"k", &[1u8; 900])?;
    assert_eq!(cache.memory_used(), 1024);

    cache.set(b"k", b"tiny")?;
    assert_eq!(cache.get(b"k")?, Some(b"tiny".to_vec()));
    assert_eq!(cache.memory_used(), 64);

    let stats = cache.slab_stats();
    let big = stats
        .size_classes
        .iter()
        .find(|c| c.chunk_size == 1024)
        .expect("1 KiB class");
    assert_eq!(big.used_chunks, 0);
    assert_eq!(big.free_chunks, big.total_chunks);
    Ok(())
}

#[test]
fn test_absent_key() -> Result<()> {
    let mut cache = Cache::new(small_pages())?;
    assert_eq!(cache.get(b"never set")?, None);
    cache.set(b"set", b"x")?;
    assert_eq!(cache.get(b"never set")?, None);
    Ok(())
}

#[test]
fn test_flush_forgets_everything() -> Result<()> {
    let mut cache = Cache::new(small_pages())?;
    let keys: Vec<String> = (0..200).map(|i| format!("user:{}", i)).collect();
    for key in &keys {
        cache.set(key.as_bytes(), b"{\"name\":\"x\"}")?;
    }

    cache.flush_all()?;

    for key in &keys {
        assert_eq!(cache.get(key.as_bytes())?, None);
    }
    assert_eq!(cache.stats().flushes, 1);
    Ok(())
}

#[test]
fn test_largest_value_fits_exactly() -> Result<()> {
    let mut cache = Cache::new(small_pages())?;
    let key = b"edge";
    let value_len = 16384 - item_total_size(key.len(), 0);

    cache.set(key, &vec![9u8; value_len])?;
    assert_eq!(cache.get(key)?.map(|v| v.len()), Some(value_len));

    assert!(matches!(
        cache.set(b"edge2", &vec![9u8; value_len + 1]),
        Err(Error::NoClassFits { .. })
    ));
    Ok(())
}

#[test]
fn test_growth_beyond_one_page() -> Result<()> {
    // 64 KiB pages hold 1024 chunks of 64 B; 3000 small items need three
    let mut cache = Cache::new(small_pages())?;
    for i in 0..3000 {
        cache.set(format!("k{}", i).as_bytes(), b"v")?;
    }

    let stats = cache.slab_stats();
    let warm = stats
        .size_classes
        .iter()
        .find(|c| c.chunk_size == 64)
        .expect("64 B class");
    assert_eq!(warm.pages, 3);
    assert_eq!(warm.used_chunks, 3000);
    assert_eq!(cache.get(b"k2999")?, Some(b"v".to_vec()));
    Ok(())
}

/// Maps keys onto two buckets by their first byte
struct ParityHasher;

impl KeyHasher for ParityHasher {
    fn hash(&self, key: &[u8]) -> u32 {
        key.first().map_or(0, |&b| (b & 1) as u32)
    }
}

#[test]
fn test_no_cross_talk_between_colliding_keys() -> Result<()> {
    let mut cache = Cache::with_parts(
        small_pages(),
        Box::new(HeapPageSource::new(None)),
        Box::new(ParityHasher),
    )?;
    assert_eq!(cache.bucket_index(b"a1"), cache.bucket_index(b"c2"));

    cache.set(b"a1", b"alpha")?;
    cache.set(b"c2", b"gamma")?;
    cache.set(b"e3", b"epsilon")?;

    assert_eq!(cache.get(b"a1")?, Some(b"alpha".to_vec()));
    assert_eq!(cache.get(b"c2")?, Some(b"gamma".to_vec()));
    assert_eq!(cache.get(b"e3")?, Some(b"epsilon".to_vec()));

    cache.remove(b"c2")?;
    assert_eq!(cache.get(b"a1")?, Some(b"alpha".to_vec()));
    assert_eq!(cache.get(b"e3")?, Some(b"epsilon".to_vec()));
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_round_trip(
        entries in proptest::collection::hash_map(
            proptest::collection::vec(any::<u8>(), 0..32),
            proptest::collection::vec(any::<u8>(), 0..2048),
            1..40,
        )
    ) {
        let mut cache = Cache::new(small_pages()).unwrap();
        for (k, v) in &entries {
            cache.set(k, v).unwrap();
        }
        for (k, v) in &entries {
            prop_assert_eq!(cache.get(k).unwrap(), Some(v.clone()));

            let mut buf = vec![0xEEu8; 17];
            let n = cache.get_into(k, &mut buf).unwrap().unwrap();
            prop_assert_eq!(n, v.len().min(16));
            prop_assert_eq!(&buf[..n], &v[..n]);
            prop_assert_eq!(buf[n], 0);
        }
        prop_assert_eq!(cache.len(), entries.len());
    }

    #[test]
    fn prop_overwrite_returns_latest(
        key in proptest::collection::vec(any::<u8>(), 1..16),
        v1 in proptest::collection::vec(any::<u8>(), 0..4000),
        v2 in proptest::collection::vec(any::<u8>(), 0..4000),
    ) {
        let mut cache = Cache::new(small_pages()).unwrap();
        cache.set(&key, &v1).unwrap();
        cache.set(&key, &v2).unwrap();

        prop_assert_eq!(cache.get(&key).unwrap(), Some(v2.clone()));
        let class = cache.allocator().class_for(item_total_size(key.len(), v2.len())).unwrap();
        prop_assert_eq!(
            cache.memory_used(),
            cache.allocator().chunk_size(class).unwrap() as u64
        );
    }

    #[test]
    fn prop_class_monotonic(s1 in 1usize..=16384, s2 in 1usize..=16384) {
        let allocator = SlabAllocator::new(
            &small_pages(),
            Box::new(HeapPageSource::new(None)),
        ).unwrap();
        let (lo, hi) = if s1 <= s2 { (s1, s2) } else { (s2, s1) };

        let lo_size = allocator.chunk_size(allocator.class_for(lo).unwrap()).unwrap();
        let hi_size = allocator.chunk_size(allocator.class_for(hi).unwrap()).unwrap();
        prop_assert!(hi_size >= lo_size);
        prop_assert!(lo_size >= lo);
    }
}
