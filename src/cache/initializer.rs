//! Entity registration at startup
//!
//! Data files are indexed from the head backwards and each file's records
//! from the end backwards, so the first record seen for an object id is its
//! newest version. Older copies are shadows and stay unindexed until their
//! file is dissolved.

use std::sync::Arc;

use tracing::info;

use crate::error::{Result, StoreError};
use crate::file::{index_records, ChannelFile, FileManager, FileRef, RecordSlot};

use super::entity::{Entity, EntityView};
use super::entity_cache::EntityCache;

impl EntityCache {
    /// Register every entity found in the recovered data files
    pub fn initialize_entities(&mut self, files: &mut FileManager) -> Result<usize> {
        let data_files: Vec<(FileRef, u64, Arc<ChannelFile>, u64)> = files
            .ring()
            .iter()
            .map(|(file_ref, f)| (file_ref, f.number(), Arc::clone(f.file()), f.total_length()))
            .collect();

        let evaluation_time = self.evaluation_time_ms();
        let mut registered = 0usize;
        let mut shadowed = 0usize;

        for (file_ref, number, file, length) in data_files.into_iter().rev() {
            if length == 0 {
                continue;
            }
            let bytes = file.read_range(0, length as usize)?;
            let slots = index_records(&bytes, 0).map_err(|e| {
                StoreError::consistency(format!("data file {}: {}", number, e))
            })?;

            for slot in slots.into_iter().rev() {
                let RecordSlot::Entity { position, header } = slot else {
                    continue;
                };
                if self.lookup(header.object_id).is_some() {
                    shadowed += 1;
                    continue;
                }
                self.validate_channel(header.object_id)?;

                let type_ref = self
                    .types
                    .resolve(header.type_id, header.object_id, &*self.dictionary)?;
                let entity_type = self.types.get(type_ref);
                entity_type
                    .handler
                    .validate_entity(header.length, header.object_id)?;
                let reference_count = entity_type.reference_count;
                if header.length > u32::MAX as u64 || position > u32::MAX as u64 {
                    return Err(StoreError::consistency(format!(
                        "entity {} in data file {} exceeds addressable range",
                        header.object_id, number
                    )));
                }

                let mut entity = Entity::new(header.object_id, type_ref, reference_count);
                entity.length = header.length as u32;
                entity.storage_position = position as u32;
                entity.last_touched = self.touch_time();

                let entity = self.arena.allocate(entity);
                self.hash_insert(entity);
                self.types.link(&mut self.arena, entity);
                files.prepend_entity(file_ref, &mut self.arena, entity)?;

                let view = EntityView {
                    cached_length: header.length,
                    ..EntityView::from(&self.arena[entity])
                };
                if self
                    .cache_evaluator
                    .initially_cache_entity(self.used_cache_size, evaluation_time, &view)
                {
                    let start = position as usize;
                    let record = &bytes[start..start + header.length as usize];
                    self.arena[entity].cache = Some(record.to_vec().into_boxed_slice());
                    self.used_cache_size += header.length;
                }
                registered += 1;
            }
        }

        info!(
            channel = self.channel,
            entities = registered,
            shadowed,
            cached = self.used_cache_size,
            "registered entities"
        );
        Ok(registered)
    }
}
