//! Entity cache eviction policy

use crate::config::StorageConfig;

use super::entity::EntityView;

/// Decides which cached payloads are dropped
pub trait EntityCacheEvaluator: Send + Sync {
    /// Whether `entity`'s cached bytes should be released
    ///
    /// `total_cache_size` is the channel's cached byte count and
    /// `evaluation_time_ms` the cache clock at evaluation.
    fn clear_entity_cache(
        &self,
        total_cache_size: u64,
        evaluation_time_ms: u64,
        entity: &EntityView,
    ) -> bool;

    /// Whether a freshly loaded entity should stay cached
    fn initially_cache_entity(
        &self,
        total_cache_size: u64,
        evaluation_time_ms: u64,
        entity: &EntityView,
    ) -> bool {
        !self.clear_entity_cache(total_cache_size, evaluation_time_ms, entity)
    }
}

/// Age and pressure based eviction
///
/// An entity is evicted when it is older than the timeout, or when its
/// weighted age exceeds the free room below the threshold. Entities without
/// references weigh double since the garbage collector never needs them.
#[derive(Debug, Clone, Copy)]
pub struct DefaultEntityCacheEvaluator {
    timeout_ms: u64,
    threshold: u64,
}

impl DefaultEntityCacheEvaluator {
    pub fn new(timeout_ms: u64, threshold: u64) -> Self {
        Self {
            timeout_ms,
            threshold,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.entity_cache_timeout_ms, config.entity_cache_threshold)
    }
}

impl EntityCacheEvaluator for DefaultEntityCacheEvaluator {
    fn clear_entity_cache(
        &self,
        total_cache_size: u64,
        evaluation_time_ms: u64,
        entity: &EntityView,
    ) -> bool {
        let age_ms = evaluation_time_ms.saturating_sub(entity.last_touched_ms);
        if age_ms >= self.timeout_ms {
            return true;
        }

        let shift = if entity.has_references { 0 } else { 1 };
        let weight = ((entity.cached_length as i128) * ((age_ms >> 16) as i128)) << shift;
        (self.threshold as i128 - total_cache_size as i128) < weight
    }
}
