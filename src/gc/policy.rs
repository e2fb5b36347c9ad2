//! Pluggable garbage collection policies

use std::collections::HashSet;

/// Resolution of marks referring to ids with no entity
pub trait ZombieOidHandler: Send + Sync {
    /// True if the zombie id was handled; unhandled ids are logged
    fn handle_zombie_oid(&self, object_id: u64) -> bool;
}

/// Leaves every zombie id unhandled
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoringZombieOidHandler;

impl ZombieOidHandler for IgnoringZombieOidHandler {
    fn handle_zombie_oid(&self, _object_id: u64) -> bool {
        false
    }
}

/// Application-side liveness check consulted before sweeping
///
/// Implementations must answer consistently within one GC generation.
pub trait LiveObjectIdChecker: Send + Sync {
    /// The subset of `candidates` the application still reaches, or `None`
    /// if that cannot be decided right now (the sweep is retried later)
    fn select_reachable(&self, candidates: &HashSet<u64>) -> Option<HashSet<u64>>;
}

/// No application-held objects; only the persistent graph counts
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLiveObjects;

impl LiveObjectIdChecker for NoLiveObjects {
    fn select_reachable(&self, _candidates: &HashSet<u64>) -> Option<HashSet<u64>> {
        Some(HashSet::new())
    }
}
