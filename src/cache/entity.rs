//! Entity arena
//!
//! Entities live in a per-channel slab and refer to each other by dense
//! index. Each entity sits in three intrusive lists at once: its hash bucket
//! chain, its type's chain and its data file's chain.

use std::ops::{Index, IndexMut};

use crate::file::FileRef;

/// Entity touch times are kept in units of 2^8 ms
pub(crate) const TOUCH_RESOLUTION_SHIFT: u32 = 8;

/// Index of an entity in its channel's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityRef(u32);

impl EntityRef {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a type registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeRef(pub(crate) u32);

/// Tri-color marking state
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(i8)]
pub enum GcColor {
    /// Not reached in the current cycle
    White = -1,
    /// Created or recovered, counts as marked until the next sweep
    Initial = 0,
    /// Reached, references still to be enqueued
    Gray = 1,
    /// Reached and references enqueued
    Black = 2,
}

impl GcColor {
    /// Survives the next sweep
    pub fn is_marked(self) -> bool {
        self >= GcColor::Initial
    }

    /// Reached in the current marking
    pub fn is_handled(self) -> bool {
        self >= GcColor::Gray
    }
}

/// One persisted object instance
#[derive(Debug)]
pub struct Entity {
    pub(crate) object_id: u64,
    pub(crate) type_ref: TypeRef,
    pub(crate) file: Option<FileRef>,
    pub(crate) length: u32,
    pub(crate) storage_position: u32,
    pub(crate) last_touched: u32,
    pub(crate) gc_color: GcColor,
    pub(crate) cache: Option<Box<[u8]>>,
    /// Cache holds only the header and leading reference slots
    pub(crate) only_references_cached: bool,
    pub(crate) reference_count: i8,
    pub(crate) deleted: bool,

    pub(crate) file_prev: Option<EntityRef>,
    pub(crate) file_next: Option<EntityRef>,
    pub(crate) hash_next: Option<EntityRef>,
    pub(crate) type_prev: Option<EntityRef>,
    pub(crate) type_next: Option<EntityRef>,
}

impl Entity {
    pub(crate) fn new(object_id: u64, type_ref: TypeRef, reference_count: i8) -> Self {
        Self {
            object_id,
            type_ref,
            file: None,
            length: 0,
            storage_position: 0,
            last_touched: 0,
            gc_color: GcColor::Initial,
            cache: None,
            only_references_cached: false,
            reference_count,
            deleted: false,
            file_prev: None,
            file_next: None,
            hash_next: None,
            type_prev: None,
            type_next: None,
        }
    }

    pub fn object_id(&self) -> u64 {
        self.object_id
    }

    /// Total record length including the header
    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn storage_position(&self) -> u32 {
        self.storage_position
    }

    pub fn file(&self) -> Option<FileRef> {
        self.file
    }

    pub fn gc_color(&self) -> GcColor {
        self.gc_color
    }

    pub fn last_touched(&self) -> u32 {
        self.last_touched
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    pub fn is_fully_cached(&self) -> bool {
        self.cache.is_some() && !self.only_references_cached
    }

    pub fn cached_length(&self) -> u64 {
        self.cache.as_ref().map(|c| c.len() as u64).unwrap_or(0)
    }

    pub fn has_references(&self) -> bool {
        self.reference_count != 0
    }

    /// 0 = none, >0 = leading reference slots, <0 = full scan needed
    pub fn reference_count(&self) -> i8 {
        self.reference_count
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Drop the cached bytes, returning how many were freed
    pub(crate) fn clear_cache(&mut self) -> u64 {
        let freed = self.cached_length();
        self.cache = None;
        self.only_references_cached = false;
        freed
    }
}

/// Read-only view handed to cache evaluators
#[derive(Debug, Clone, Copy)]
pub struct EntityView {
    pub object_id: u64,
    pub length: u32,
    pub cached_length: u64,
    /// Milliseconds since the cache started, at 256 ms resolution
    pub last_touched_ms: u64,
    pub has_references: bool,
}

impl From<&Entity> for EntityView {
    fn from(entity: &Entity) -> Self {
        Self {
            object_id: entity.object_id,
            length: entity.length,
            cached_length: entity.cached_length(),
            last_touched_ms: (entity.last_touched as u64) << TOUCH_RESOLUTION_SHIFT,
            has_references: entity.has_references(),
        }
    }
}

// =============================================================================
// Arena
// =============================================================================

/// Slab of entities with slot reuse
#[derive(Debug, Default)]
pub struct EntityArena {
    entities: Vec<Entity>,
    free: Vec<u32>,
    live: usize,
}

impl EntityArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn allocate(&mut self, entity: Entity) -> EntityRef {
        self.live += 1;
        match self.free.pop() {
            Some(slot) => {
                self.entities[slot as usize] = entity;
                EntityRef(slot)
            }
            None => {
                self.entities.push(entity);
                EntityRef((self.entities.len() - 1) as u32)
            }
        }
    }

    /// Mark the slot deleted and make it reusable
    pub(crate) fn release(&mut self, entity: EntityRef) {
        let slot = &mut self.entities[entity.index()];
        slot.deleted = true;
        slot.cache = None;
        slot.file = None;
        slot.file_prev = None;
        slot.file_next = None;
        slot.hash_next = None;
        slot.type_prev = None;
        slot.type_next = None;
        self.free.push(entity.0);
        self.live -= 1;
    }

    /// Number of live entities
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

impl Index<EntityRef> for EntityArena {
    type Output = Entity;

    fn index(&self, entity: EntityRef) -> &Entity {
        &self.entities[entity.index()]
    }
}

impl IndexMut<EntityRef> for EntityArena {
    fn index_mut(&mut self, entity: EntityRef) -> &mut Entity {
        &mut self.entities[entity.index()]
    }
}
