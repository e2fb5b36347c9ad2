//! Garbage collection coordination
//!
//! ## Responsibilities
//! - Per-channel mark queues fed by every channel
//! - Central pending mark accounting and sweep phase transitions
//! - Batched cross-channel reference marking
//! - Zombie id and application liveness policies
//!
//! ```text
//!  channel 0 thread                         channel 1 thread
//!  ┌──────────────────┐                     ┌──────────────────┐
//!  │ incremental_mark │                     │ incremental_mark │
//!  │   marker.mark ───┼──► MarkMonitor ◄────┼── marker.mark    │
//!  └──────▲───────────┘   (pending count,   └──────▲───────────┘
//!         │                sweep flags)            │
//!    queue 0 ◄──────────── enqueue_bulk ──────► queue 1
//! ```
//!
//! Marking and sweeping of entities happens in the entity cache; this
//! module only holds the shared state.

mod marker;
mod monitor;
mod policy;
mod queue;

pub use marker::CachingReferenceMarker;
pub use monitor::{MarkMonitor, MarkMonitorStatus};
pub use policy::{IgnoringZombieOidHandler, LiveObjectIdChecker, NoLiveObjects, ZombieOidHandler};
pub use queue::ObjectIdMarkQueue;
