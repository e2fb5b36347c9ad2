//! Tests for cached payloads and cache checks
//!
//! These tests verify:
//! - Stored records are cached according to the evaluator
//! - Loads read evicted records back from their data file
//! - Issued cache checks with ad hoc evaluators
//! - Deadline-bounded checks still make progress
//! - A check cycle only completes once it clears nothing

use std::sync::Arc;
use std::time::{Duration, Instant};

use channelstore::cache::{EntityCacheEvaluator, EntityView};
use channelstore::gc::MarkMonitor;

use crate::common::*;

// =============================================================================
// Helper Functions
// =============================================================================

struct EvictAll;

impl EntityCacheEvaluator for EvictAll {
    fn clear_entity_cache(&self, _total: u64, _now: u64, _entity: &EntityView) -> bool {
        true
    }
}

struct EvictLargerThan(u64);

impl EntityCacheEvaluator for EvictLargerThan {
    fn clear_entity_cache(&self, _total: u64, _now: u64, entity: &EntityView) -> bool {
        entity.length as u64 > self.0
    }
}

fn later() -> Instant {
    Instant::now() + Duration::from_secs(10)
}

// =============================================================================
// Caching Tests
// =============================================================================

#[test]
fn test_stored_records_are_cached() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1).build().unwrap();
    let monitor = Arc::new(MarkMonitor::new(1));
    let mut storage = open_channel(&config, &monitor).unwrap();

    store(&mut storage, &[blob(1, 16), blob(2, 32)]).unwrap();

    assert_eq!(storage.cache().used_cache_size(), 40 + 56);
    assert!(storage.cache().get_entry(1).unwrap().is_fully_cached());
}

#[test]
fn test_zero_timeout_never_caches_initially() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1)
        .entity_cache_timeout_ms(0)
        .build()
        .unwrap();
    let monitor = Arc::new(MarkMonitor::new(1));
    let mut storage = open_channel(&config, &monitor).unwrap();

    store(&mut storage, &[blob(1, 16)]).unwrap();
    assert_eq!(storage.cache().used_cache_size(), 0);
    assert!(!storage.cache().get_entry(1).unwrap().is_cached());

    // loading caches the record until the next check
    assert_eq!(storage.load(1).unwrap(), Some(blob(1, 16)));
    assert_eq!(storage.cache().used_cache_size(), 40);
    assert!(storage.issue_cache_check(later(), None).unwrap());
    assert_eq!(storage.cache().used_cache_size(), 0);
}

#[test]
fn test_evicted_record_loads_from_file() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1).build().unwrap();
    let monitor = Arc::new(MarkMonitor::new(1));
    let mut storage = open_channel(&config, &monitor).unwrap();
    let records: Vec<_> = (1..=5u64).map(|id| blob(id, id as usize * 8)).collect();
    store(&mut storage, &records).unwrap();

    assert!(storage.issue_cache_check(later(), Some(&EvictAll)).unwrap());
    assert_eq!(storage.cache().used_cache_size(), 0);

    for (id, record) in (1..=5u64).zip(records) {
        assert!(!storage.cache().get_entry(id).unwrap().is_cached());
        assert_eq!(storage.load(id).unwrap(), Some(record));
    }
}

#[test]
fn test_default_evaluator_keeps_fresh_entities() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1).build().unwrap();
    let monitor = Arc::new(MarkMonitor::new(1));
    let mut storage = open_channel(&config, &monitor).unwrap();
    store(&mut storage, &[blob(1, 16), blob(2, 16)]).unwrap();

    assert!(storage.issue_cache_check(later(), None).unwrap());

    assert_eq!(storage.cache().used_cache_size(), 80);
}

#[test]
fn test_selective_eviction() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1).build().unwrap();
    let monitor = Arc::new(MarkMonitor::new(1));
    let mut storage = open_channel(&config, &monitor).unwrap();
    store(&mut storage, &[blob(1, 16), blob(2, 200), blob(3, 8)]).unwrap();

    assert!(storage
        .issue_cache_check(later(), Some(&EvictLargerThan(100)))
        .unwrap());

    assert!(storage.cache().get_entry(1).unwrap().is_cached());
    assert!(!storage.cache().get_entry(2).unwrap().is_cached());
    assert!(storage.cache().get_entry(3).unwrap().is_cached());
    assert_eq!(storage.cache().used_cache_size(), 40 + 32);
}

#[test]
fn test_incremental_cycle_completes_only_without_eviction() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1).build().unwrap();
    let monitor = Arc::new(MarkMonitor::new(1));
    let mut storage = open_channel_with(&config, 0, &monitor, |cache| {
        cache.with_cache_evaluator(Arc::new(EvictLargerThan(100)))
    })
    .unwrap();
    store(&mut storage, &[blob(1, 16), blob(2, 200), blob(3, 8)]).unwrap();

    // the first cycle clears record 2, the second finds nothing left to clear
    assert!(!storage.incremental_cache_check(later()).unwrap());
    assert_eq!(storage.cache().used_cache_size(), 40 + 32);
    assert!(storage.incremental_cache_check(later()).unwrap());
    assert_eq!(storage.cache().used_cache_size(), 40 + 32);
}

#[test]
fn test_expired_deadline_still_evaluates_one_entity() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1).build().unwrap();
    let monitor = Arc::new(MarkMonitor::new(1));
    let mut storage = open_channel(&config, &monitor).unwrap();
    let records: Vec<_> = (1..=4u64).map(|id| blob(id, 16)).collect();
    store(&mut storage, &records).unwrap();
    assert_eq!(storage.cache().used_cache_size(), 160);

    let done = storage
        .issue_cache_check(Instant::now(), Some(&EvictAll))
        .unwrap();

    assert!(!done);
    assert_eq!(storage.cache().used_cache_size(), 120);
}

#[test]
fn test_recovered_entities_are_cached_by_evaluator() {
    let (_temp, path) = setup_temp_storage();
    let monitor = Arc::new(MarkMonitor::new(1));
    {
        let config = base_config(&path, 1).build().unwrap();
        let mut storage = open_channel(&config, &monitor).unwrap();
        store(&mut storage, &[blob(1, 16), blob(2, 16)]).unwrap();
    }

    let caching = base_config(&path, 1).build().unwrap();
    let storage = open_channel(&caching, &monitor).unwrap();
    assert_eq!(storage.cache().used_cache_size(), 80);

    let lazy = base_config(&path, 1)
        .entity_cache_timeout_ms(0)
        .build()
        .unwrap();
    drop(storage);
    let mut storage = open_channel(&lazy, &monitor).unwrap();
    assert_eq!(storage.cache().used_cache_size(), 0);
    assert_eq!(storage.load(2).unwrap(), Some(blob(2, 16)));
}
