//! Entity Cache Module
//!
//! The per-channel live object index and its garbage collector.
//!
//! ## Responsibilities
//! - Entity arena with intrusive hash, type and file chains
//! - Type handler registry per channel
//! - Loading, caching and evicting record bytes
//! - Incremental tri-color marking and sweeping
//! - Registering entities from data files at startup
//!
//! ```text
//!            ┌──────────────── EntityCache ────────────────┐
//!            │  table ──► EntityArena ◄── TypeRegistry     │
//!            │                 │                           │
//!            │     file chains │ (FileManager's ring)      │
//!            │  CachingReferenceMarker ──► MarkMonitor     │
//!            └─────────────────────────────────────────────┘
//! ```

mod collector;
mod entity;
mod entity_cache;
mod evaluator;
mod initializer;
mod types;

pub use entity::{Entity, EntityArena, EntityRef, EntityView, GcColor, TypeRef};
pub use entity_cache::EntityCache;
pub use evaluator::{DefaultEntityCacheEvaluator, EntityCacheEvaluator};
pub use types::{
    LayoutTypeHandler, MapTypeDictionary, OpaqueTypeDictionary, ReferenceLayout, TypeDictionary,
    TypeHandler,
};
