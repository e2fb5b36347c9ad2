//! Type handlers and the per-channel type registry

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, StoreError};
use crate::file::RECORD_HEADER_LENGTH;

use super::entity::{EntityArena, EntityRef, TypeRef};

/// Knowledge about the records of one type
pub trait TypeHandler: Send + Sync {
    fn type_id(&self) -> u64;

    fn has_references(&self) -> bool;

    /// Count of leading reference slots when fixed, otherwise 0 or negative
    fn simple_reference_count(&self) -> i64;

    /// Call `acceptor` for every reference id in `record` (header included)
    ///
    /// For types with a simple reference count `record` may hold only the
    /// header and the leading reference slots.
    fn iterate_reference_ids(&self, record: &[u8], acceptor: &mut dyn FnMut(u64));

    /// Check a record length read from a data file
    fn validate_entity(&self, length: u64, object_id: u64) -> Result<()>;
}

/// Lookup of type handlers by type id
pub trait TypeDictionary: Send + Sync {
    fn lookup(&self, type_id: u64) -> Option<Arc<dyn TypeHandler>>;
}

// =============================================================================
// Layout Type Handler
// =============================================================================

/// Where a record body keeps its reference ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceLayout {
    /// No references
    None,
    /// The first `n` u64 values of the body are reference ids
    Leading(usize),
    /// The whole body is a list of reference ids
    All,
}

/// Type handler for records with a fixed reference layout
#[derive(Debug, Clone)]
pub struct LayoutTypeHandler {
    type_id: u64,
    layout: ReferenceLayout,
}

impl LayoutTypeHandler {
    pub fn new(type_id: u64, layout: ReferenceLayout) -> Self {
        Self { type_id, layout }
    }

    pub fn layout(&self) -> ReferenceLayout {
        self.layout
    }
}

impl TypeHandler for LayoutTypeHandler {
    fn type_id(&self) -> u64 {
        self.type_id
    }

    fn has_references(&self) -> bool {
        !matches!(self.layout, ReferenceLayout::None | ReferenceLayout::Leading(0))
    }

    fn simple_reference_count(&self) -> i64 {
        match self.layout {
            ReferenceLayout::Leading(n) => n as i64,
            ReferenceLayout::None | ReferenceLayout::All => 0,
        }
    }

    fn iterate_reference_ids(&self, record: &[u8], acceptor: &mut dyn FnMut(u64)) {
        let body = record.get(RECORD_HEADER_LENGTH..).unwrap_or(&[]);
        let slots = match self.layout {
            ReferenceLayout::None => 0,
            ReferenceLayout::Leading(n) => n.min(body.len() / 8),
            ReferenceLayout::All => body.len() / 8,
        };
        for slot in body.chunks_exact(8).take(slots) {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(slot);
            acceptor(u64::from_le_bytes(raw));
        }
    }

    fn validate_entity(&self, length: u64, object_id: u64) -> Result<()> {
        let body = length
            .checked_sub(RECORD_HEADER_LENGTH as u64)
            .ok_or_else(|| {
                StoreError::consistency(format!(
                    "record of object {} shorter than its header: {}",
                    object_id, length
                ))
            })?;
        let valid = match self.layout {
            ReferenceLayout::None => true,
            ReferenceLayout::Leading(n) => body >= n as u64 * 8,
            ReferenceLayout::All => body % 8 == 0,
        };
        if valid {
            Ok(())
        } else {
            Err(StoreError::consistency(format!(
                "record of object {} with length {} does not match type {} layout {:?}",
                object_id, length, self.type_id, self.layout
            )))
        }
    }
}

/// Dictionary over a fixed handler set
#[derive(Default, Clone)]
pub struct MapTypeDictionary {
    handlers: HashMap<u64, Arc<dyn TypeHandler>>,
}

impl MapTypeDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl TypeHandler + 'static) -> Self {
        self.handlers.insert(handler.type_id(), Arc::new(handler));
        self
    }

    pub fn with_layout(self, type_id: u64, layout: ReferenceLayout) -> Self {
        self.with(LayoutTypeHandler::new(type_id, layout))
    }
}

impl TypeDictionary for MapTypeDictionary {
    fn lookup(&self, type_id: u64) -> Option<Arc<dyn TypeHandler>> {
        self.handlers.get(&type_id).cloned()
    }
}

/// Treats every type as reference-free; for tooling without a schema
#[derive(Debug, Default, Clone, Copy)]
pub struct OpaqueTypeDictionary;

impl TypeDictionary for OpaqueTypeDictionary {
    fn lookup(&self, type_id: u64) -> Option<Arc<dyn TypeHandler>> {
        Some(Arc::new(LayoutTypeHandler::new(type_id, ReferenceLayout::None)))
    }
}

// =============================================================================
// Type Registry
// =============================================================================

/// Registry entry: the chain of one type's entities
pub(crate) struct EntityType {
    pub(crate) type_id: u64,
    pub(crate) handler: Arc<dyn TypeHandler>,
    pub(crate) reference_count: i8,
    pub(crate) head: Option<EntityRef>,
    pub(crate) tail: Option<EntityRef>,
    pub(crate) count: usize,
}

/// Per-channel type table
#[derive(Default)]
pub(crate) struct TypeRegistry {
    types: Vec<EntityType>,
    by_id: HashMap<u64, TypeRef>,
}

impl TypeRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lookup(&self, type_id: u64) -> Option<TypeRef> {
        self.by_id.get(&type_id).copied()
    }

    /// Entry for `type_id`, registered from `dictionary` on first use
    pub(crate) fn resolve(
        &mut self,
        type_id: u64,
        object_id: u64,
        dictionary: &dyn TypeDictionary,
    ) -> Result<TypeRef> {
        if let Some(existing) = self.by_id.get(&type_id) {
            return Ok(*existing);
        }

        let handler = dictionary
            .lookup(type_id)
            .ok_or(StoreError::UnknownType { type_id, object_id })?;

        let reference_count = if !handler.has_references() {
            0
        } else {
            let simple = handler.simple_reference_count();
            if simple <= 0 || simple > i8::MAX as i64 {
                -1
            } else {
                simple as i8
            }
        };

        let type_ref = TypeRef(self.types.len() as u32);
        self.types.push(EntityType {
            type_id,
            handler,
            reference_count,
            head: None,
            tail: None,
            count: 0,
        });
        self.by_id.insert(type_id, type_ref);
        Ok(type_ref)
    }

    pub(crate) fn get(&self, type_ref: TypeRef) -> &EntityType {
        &self.types[type_ref.0 as usize]
    }

    pub(crate) fn refs(&self) -> impl Iterator<Item = TypeRef> {
        (0..self.types.len() as u32).map(TypeRef)
    }

    /// Append `entity` to its type's chain
    pub(crate) fn link(&mut self, arena: &mut EntityArena, entity: EntityRef) {
        let type_ref = arena[entity].type_ref;
        let entry = &mut self.types[type_ref.0 as usize];

        arena[entity].type_prev = entry.tail;
        arena[entity].type_next = None;
        match entry.tail {
            Some(tail) => arena[tail].type_next = Some(entity),
            None => entry.head = Some(entity),
        }
        entry.tail = Some(entity);
        entry.count += 1;
    }

    /// Remove `entity` from its type's chain
    pub(crate) fn unlink(&mut self, arena: &mut EntityArena, entity: EntityRef) {
        let (type_ref, prev, next) = {
            let e = &arena[entity];
            (e.type_ref, e.type_prev, e.type_next)
        };
        let entry = &mut self.types[type_ref.0 as usize];

        match prev {
            Some(p) => arena[p].type_next = next,
            None => entry.head = next,
        }
        match next {
            Some(n) => arena[n].type_prev = prev,
            None => entry.tail = prev,
        }
        arena[entity].type_prev = None;
        arena[entity].type_next = None;
        entry.count -= 1;
    }
}
