//! Behavioral tests for PoolCache.
//!
//! These tests exercise the cache through its public surface only:
//! round-trips, replacement, LRU ordering against an independent model,
//! manual draining, and the error taxonomy.

use std::sync::Arc;

use parking_lot::Mutex;
use pool_cache::{CacheError, PoolCache, PoolCacheBuilder, Replacement, MIN_POOL_SIZE};

/// Generate a verifiable value with a position-dependent pattern.
fn generate_value(size: usize, seed: u8) -> Vec<u8> {
    (0..size).map(|i| (i as u8).wrapping_add(seed)).collect()
}

/// Verify a value matches the expected pattern.
fn verify_value(data: &[u8], expected_size: usize, seed: u8) -> bool {
    if data.len() != expected_size {
        return false;
    }
    data.iter()
        .enumerate()
        .all(|(i, &b)| b == (i as u8).wrapping_add(seed))
}

fn lru_cache(fragment_size: usize) -> PoolCache {
    PoolCacheBuilder::new()
        .pool_size(MIN_POOL_SIZE)
        .fragment_size(fragment_size)
        .replacement(Replacement::Lru)
        .build()
        .expect("failed to create cache")
}

// =============================================================================
// Round-trip
// =============================================================================

#[test]
fn test_round_trip_various_sizes() {
    let cache = lru_cache(64);

    for (i, size) in [1usize, 8, 63, 64, 65, 1000, 4096, 65536]
        .iter()
        .enumerate()
    {
        let key = format!("key_{size}");
        let value = generate_value(*size, i as u8);
        cache.put(key.as_bytes(), &value).expect("put failed");

        let guard = cache.get(key.as_bytes()).expect("get failed");
        assert!(
            verify_value(guard.value(), *size, i as u8),
            "corruption in {size} byte value"
        );
    }
}

#[test]
fn test_directory_backed_pool_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir failed");
    let cache = PoolCacheBuilder::new()
        .path(dir.path())
        .pool_size(MIN_POOL_SIZE)
        .replacement(Replacement::Lru)
        .build()
        .expect("failed to create file-backed cache");

    let value = generate_value(100_000, 7);
    cache.put(b"on_disk", &value).unwrap();

    let guard = cache.get(b"on_disk").unwrap();
    assert!(verify_value(guard.value(), 100_000, 7));
}

// =============================================================================
// Key uniqueness and reclamation
// =============================================================================

#[test]
fn test_replace_updates_value_and_reclaims_old_extent() {
    let cache = lru_cache(256);

    cache.put(b"k", &generate_value(512, 1)).unwrap();
    let old = cache.get(b"k").unwrap();

    // Replace while a reader still holds the old value.
    cache.put(b"k", &generate_value(512, 2)).unwrap();

    // Both extents are live: the reader pins the old one.
    assert_eq!(cache.stats().used_bytes, 1024);
    assert!(verify_value(old.value(), 512, 1));

    let fresh = cache.get(b"k").unwrap();
    assert!(verify_value(fresh.value(), 512, 2));
    drop(fresh);

    // Releasing the last handle on the old value reclaims its extent.
    drop(old);
    assert_eq!(cache.stats().used_bytes, 512);
    assert_eq!(cache.stats().entries, 1);
}

// =============================================================================
// LRU ordering
// =============================================================================

#[test]
fn test_lru_evicts_least_recently_touched_first() {
    let evicted: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let log = evicted.clone();

    let cache = PoolCacheBuilder::new()
        .pool_size(MIN_POOL_SIZE)
        .fragment_size(256)
        .replacement(Replacement::Lru)
        .on_evict(move |key, _value| {
            log.lock().push(String::from_utf8(key.to_vec()).unwrap());
        })
        .build()
        .unwrap();

    // 256 values of 4096 bytes fill the 1MB pool exactly.
    let fill = cache.capacity() / 4096;
    for i in 0..fill {
        let key = format!("key_{i:04}");
        cache.put(key.as_bytes(), &generate_value(4096, i as u8)).unwrap();
    }
    assert!(evicted.lock().is_empty());

    // Touch the ten oldest keys; they move off the chopping block.
    for i in 0..10 {
        let key = format!("key_{i:04}");
        let _ = cache.get(key.as_bytes()).unwrap();
    }

    // Ten more puts evict the ten least-recently-touched keys, in order.
    for i in fill..fill + 10 {
        let key = format!("key_{i:04}");
        cache.put(key.as_bytes(), &generate_value(4096, i as u8)).unwrap();
    }

    let expected: Vec<String> = (10..20).map(|i| format!("key_{i:04}")).collect();
    assert_eq!(*evicted.lock(), expected);

    // The touched keys survived.
    for i in 0..10 {
        let key = format!("key_{i:04}");
        assert!(cache.exists(key.as_bytes()));
    }
}

#[test]
fn test_filling_past_capacity_never_fails_under_lru() {
    let cache = lru_cache(256);
    let writes = 3 * cache.capacity() / 4096;

    for i in 0..writes {
        let key = format!("key_{i:06}");
        cache
            .put(key.as_bytes(), &generate_value(4096, i as u8))
            .expect("put failed under eviction pressure");
    }

    // The most recent write is always resident.
    let key = format!("key_{:06}", writes - 1);
    let guard = cache.get(key.as_bytes()).unwrap();
    assert!(verify_value(guard.value(), 4096, (writes - 1) as u8));
    drop(guard);

    let stats = cache.stats();
    assert_eq!(stats.puts, writes as u64);
    assert_eq!(stats.evictions, (writes - stats.entries as usize) as u64);
}

// =============================================================================
// Manual eviction
// =============================================================================

#[test]
fn test_manual_drain_empties_cache_in_lru_order() {
    let evicted: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
    let log = evicted.clone();

    let cache = PoolCacheBuilder::new()
        .pool_size(MIN_POOL_SIZE)
        .fragment_size(64)
        .replacement(Replacement::Lru)
        .on_evict(move |key, _| log.lock().push(key.to_vec()))
        .build()
        .unwrap();

    let keys: Vec<Vec<u8>> = (0..50u8).map(|i| vec![b'k', i]).collect();
    for key in &keys {
        cache.put(key, b"payload").unwrap();
    }

    // The canonical "free everything" idiom.
    let mut drained = 0;
    while cache.evict(None).is_ok() {
        drained += 1;
    }

    assert_eq!(drained, keys.len());
    assert_eq!(cache.evict(None), Err(CacheError::NoVictim));
    assert_eq!(*evicted.lock(), keys);

    let stats = cache.stats();
    assert_eq!(stats.entries, 0);
    assert_eq!(stats.used_bytes, 0);
}

#[test]
fn test_keyed_evict_hits_exactly_that_key() {
    let cache = lru_cache(64);
    cache.put(b"keep_a", b"1").unwrap();
    cache.put(b"drop", b"2").unwrap();
    cache.put(b"keep_b", b"3").unwrap();

    cache.evict(Some(b"drop")).unwrap();

    assert!(cache.exists(b"keep_a"));
    assert!(!cache.exists(b"drop"));
    assert!(cache.exists(b"keep_b"));
}

// =============================================================================
// Error reporting
// =============================================================================

#[test]
fn test_not_found_on_never_inserted_key() {
    let cache = lru_cache(64);
    cache.put(b"present", b"v").unwrap();

    assert_eq!(cache.get(b"absent").err(), Some(CacheError::NotFound));
    assert_eq!(cache.evict(Some(b"absent")), Err(CacheError::NotFound));
    assert!(!cache.exists(b"absent"));
}

#[test]
fn test_oversized_value_sets_thread_local_message() {
    let cache = lru_cache(64);
    let oversized = vec![0u8; cache.capacity() + 1];

    assert_eq!(cache.put(b"big", &oversized), Err(CacheError::OutOfSpace));
    assert!(cache.last_error_message().contains("exceeds"));

    // The next failure overwrites the message.
    assert_eq!(cache.get(b"absent").err(), Some(CacheError::NotFound));
    assert!(cache.last_error_message().contains("not found"));
}

#[test]
fn test_construction_parameter_validation() {
    assert_eq!(
        PoolCacheBuilder::new()
            .pool_size(MIN_POOL_SIZE - 1)
            .build()
            .err(),
        Some(CacheError::InvalidArgument)
    );
    assert!(!pool_cache::last_error_message().is_empty());

    assert_eq!(
        PoolCacheBuilder::new()
            .fragment_size(MIN_POOL_SIZE * 2)
            .build()
            .err(),
        Some(CacheError::InvalidArgument)
    );

    assert_eq!(
        PoolCache::new(
            pool_cache::PoolBacking::Directory("/nonexistent/dir".into()),
            MIN_POOL_SIZE,
            256,
            Replacement::Lru,
        )
        .err(),
        Some(CacheError::Io)
    );
}
