//! Data file ring
//!
//! A channel's data files form a cycle ordered by number: the head file's
//! `next` is the oldest file. Each file keeps the chain of entities whose
//! current version it holds, in storage position order.

use std::sync::Arc;

use crate::cache::{EntityArena, EntityRef};
use crate::error::{Result, StoreError};

use super::channel_file::ChannelFile;
use super::evaluator::DataFileView;

/// Index of a data file in its channel's ring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileRef(u32);

impl FileRef {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One append-only data file
#[derive(Debug)]
pub struct DataFile {
    pub(crate) number: u64,
    pub(crate) file: Arc<ChannelFile>,
    pub(crate) created_at: u64,
    /// Committed physical length
    pub(crate) total_length: u64,
    /// Bytes held by live entities
    pub(crate) data_length: u64,
    pub(crate) first: Option<EntityRef>,
    pub(crate) last: Option<EntityRef>,
    pub(crate) prev: FileRef,
    pub(crate) next: FileRef,
}

impl DataFile {
    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn file(&self) -> &Arc<ChannelFile> {
        &self.file
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn data_length(&self) -> u64 {
        self.data_length
    }

    pub fn has_content(&self) -> bool {
        self.first.is_some()
    }

    /// Someone besides the ring holds the file (e.g. a pending backup copy)
    pub fn has_users(&self) -> bool {
        Arc::strong_count(&self.file) > 1
    }

    pub fn is_single_entity(&self) -> bool {
        self.first.is_some() && self.first == self.last && self.data_length == self.total_length
    }

    pub fn view(&self, is_head: bool) -> DataFileView {
        DataFileView {
            number: self.number,
            total_length: self.total_length,
            data_length: self.data_length,
            is_head,
            is_single_entity: self.is_single_entity(),
        }
    }

    // =========================================================================
    // Entity Chain
    // =========================================================================

    /// Link `entity` as the last entity of this file
    pub(crate) fn append_entity(&mut self, me: FileRef, arena: &mut EntityArena, entity: EntityRef) {
        let slot = &mut arena[entity];
        slot.file = Some(me);
        slot.file_prev = self.last;
        slot.file_next = None;
        let length = slot.length as u64;

        match self.last {
            Some(last) => arena[last].file_next = Some(entity),
            None => self.first = Some(entity),
        }
        self.last = Some(entity);
        self.data_length += length;
    }

    /// Link `entity` as the first entity of this file
    pub(crate) fn prepend_entity(&mut self, me: FileRef, arena: &mut EntityArena, entity: EntityRef) {
        let slot = &mut arena[entity];
        slot.file = Some(me);
        slot.file_prev = None;
        slot.file_next = self.first;
        let length = slot.length as u64;

        match self.first {
            Some(first) => arena[first].file_prev = Some(entity),
            None => self.last = Some(entity),
        }
        self.first = Some(entity);
        self.data_length += length;
    }

    /// Unlink `entity`; its bytes become a gap
    pub(crate) fn remove_entity(&mut self, arena: &mut EntityArena, entity: EntityRef) {
        let (prev, next, length) = {
            let slot = &arena[entity];
            (slot.file_prev, slot.file_next, slot.length as u64)
        };

        match prev {
            Some(p) => arena[p].file_next = next,
            None => self.first = next,
        }
        match next {
            Some(n) => arena[n].file_prev = prev,
            None => self.last = prev,
        }

        let slot = &mut arena[entity];
        slot.file = None;
        slot.file_prev = None;
        slot.file_next = None;
        self.data_length -= length;
    }

    /// Cut the chain from the first entity through `last` (`length` bytes)
    pub(crate) fn remove_head_bound_chain(
        &mut self,
        arena: &mut EntityArena,
        last: EntityRef,
        length: u64,
    ) -> Result<()> {
        let new_first = arena[last].file_next;

        match new_first {
            None => {
                if length != self.data_length {
                    return Err(StoreError::consistency(format!(
                        "file {}: clearing chain of {} bytes but {} bytes are live",
                        self.number, length, self.data_length
                    )));
                }
                self.first = None;
                self.last = None;
            }
            Some(first) => {
                if length >= self.data_length {
                    return Err(StoreError::consistency(format!(
                        "file {}: partial chain of {} bytes covers all {} live bytes",
                        self.number, length, self.data_length
                    )));
                }
                arena[first].file_prev = None;
                self.first = Some(first);
            }
        }

        arena[last].file_next = None;
        self.data_length -= length;
        Ok(())
    }

    /// Append the already linked chain `first..=last` (`length` bytes)
    pub(crate) fn add_chain_to_tail(
        &mut self,
        me: FileRef,
        arena: &mut EntityArena,
        first: EntityRef,
        last: EntityRef,
        length: u64,
    ) {
        arena[first].file_prev = self.last;
        match self.last {
            Some(tail) => arena[tail].file_next = Some(first),
            None => self.first = Some(first),
        }
        self.last = Some(last);

        let mut cursor = Some(first);
        while let Some(entity) = cursor {
            arena[entity].file = Some(me);
            if entity == last {
                break;
            }
            cursor = arena[entity].file_next;
        }
        arena[last].file_next = None;
        self.data_length += length;
    }
}

// =============================================================================
// Ring
// =============================================================================

/// Arena of data files linked in a cycle
#[derive(Debug, Default)]
pub struct DataFileRing {
    files: Vec<Option<DataFile>>,
    free: Vec<u32>,
    head: Option<FileRef>,
    count: usize,
}

impl DataFileRing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> Option<FileRef> {
        self.head
    }

    /// Oldest file (the head's successor)
    pub fn oldest(&self) -> Option<FileRef> {
        self.head.map(|h| self.files[h.index()].as_ref().map(|f| f.next).unwrap_or(h))
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn get(&self, file: FileRef) -> Result<&DataFile> {
        self.files
            .get(file.index())
            .and_then(|f| f.as_ref())
            .ok_or_else(|| StoreError::consistency(format!("stale data file reference {:?}", file)))
    }

    pub fn get_mut(&mut self, file: FileRef) -> Result<&mut DataFile> {
        self.files
            .get_mut(file.index())
            .and_then(|f| f.as_mut())
            .ok_or_else(|| StoreError::consistency(format!("stale data file reference {:?}", file)))
    }

    /// Insert a new file as head; it must be numbered above every file
    pub(crate) fn push_head(
        &mut self,
        number: u64,
        file: Arc<ChannelFile>,
        created_at: u64,
        total_length: u64,
    ) -> Result<FileRef> {
        if let Some(head) = self.head {
            let current = self.get(head)?.number;
            if number <= current {
                return Err(StoreError::consistency(format!(
                    "new head file {} not after head file {}",
                    number, current
                )));
            }
        }

        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.files.push(None);
                (self.files.len() - 1) as u32
            }
        };
        let me = FileRef(slot);

        let (prev, next) = match self.head {
            Some(head) => (head, self.get(head)?.next),
            None => (me, me),
        };

        self.files[me.index()] = Some(DataFile {
            number,
            file,
            created_at,
            total_length,
            data_length: 0,
            first: None,
            last: None,
            prev,
            next,
        });

        if self.head.is_some() {
            self.get_mut(prev)?.next = me;
            self.get_mut(next)?.prev = me;
        }
        self.head = Some(me);
        self.count += 1;
        Ok(me)
    }

    /// Unlink a non-head file from the cycle and take it out of the arena
    pub(crate) fn detach(&mut self, file: FileRef) -> Result<DataFile> {
        if self.head == Some(file) {
            return Err(StoreError::consistency("cannot detach the head file"));
        }
        let (prev, next) = {
            let f = self.get(file)?;
            (f.prev, f.next)
        };
        self.get_mut(prev)?.next = next;
        self.get_mut(next)?.prev = prev;

        let detached = self.files[file.index()]
            .take()
            .ok_or_else(|| StoreError::consistency("detaching a vacant file slot"))?;
        self.free.push(file.0);
        self.count -= 1;
        Ok(detached)
    }

    /// Files from oldest to head
    pub fn iter(&self) -> RingIter<'_> {
        RingIter {
            ring: self,
            cursor: self.oldest(),
            remaining: self.count,
        }
    }

    /// Successor in the cycle
    pub fn next_of(&self, file: FileRef) -> Result<FileRef> {
        Ok(self.get(file)?.next)
    }

    /// Drop every file; used when initialization restarts
    pub(crate) fn clear(&mut self) {
        self.files.clear();
        self.free.clear();
        self.head = None;
        self.count = 0;
    }
}

/// Iterator over the ring from the oldest file to the head
pub struct RingIter<'a> {
    ring: &'a DataFileRing,
    cursor: Option<FileRef>,
    remaining: usize,
}

impl<'a> Iterator for RingIter<'a> {
    type Item = (FileRef, &'a DataFile);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let current = self.cursor?;
        let file = self.ring.files.get(current.index())?.as_ref()?;
        self.cursor = Some(file.next);
        self.remaining -= 1;
        Some((current, file))
    }
}
