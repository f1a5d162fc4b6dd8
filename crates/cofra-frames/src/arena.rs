//! Frame records and the arena that owns them.
//!
//! Records are addressed by [`FrameId`], an index plus a generation. Freeing
//! a slot bumps its generation, so an id that outlived its record is caught by
//! the well-formedness check instead of aliasing whatever reuses the slot.
//!
//! Reference counting follows the interpreter's model: every holder of a
//! `FrameId` that keeps the frame alive owns one count, and a linked frame owns
//! one count on its back-link. Dropping the last count frees the record and
//! releases its back-link, walking up the chain iteratively.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use cofra_common_core::{contract, require};

use crate::code::CodeInfo;

// =============================================================================
// FrameId
// =============================================================================

/// Stable handle to a frame record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId {
    index: u32,
    generation: u32,
}

impl FrameId {
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

// =============================================================================
// FrameRecord
// =============================================================================

/// One logical call frame.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub(crate) refcount: u32,
    pub(crate) back: Option<FrameId>,
    pub(crate) code: Arc<CodeInfo>,
    pub(crate) owner: ThreadId,
    pub(crate) line: u32,
    pub(crate) traced: bool,
    /// Set while the record is part of the active chain.
    pub(crate) on_stack: bool,
}

impl FrameRecord {
    /// A fresh, unlinked record positioned at the routine's first line and
    /// owned by the calling thread. The count is assigned on insertion.
    pub fn new(code: Arc<CodeInfo>) -> Self {
        let line = code.first_line;
        Self {
            refcount: 0,
            back: None,
            code,
            owner: thread::current().id(),
            line,
            traced: false,
            on_stack: false,
        }
    }

    /// Builder-style trace flag, for allocators that carry it over.
    pub fn with_trace(mut self, traced: bool) -> Self {
        self.traced = traced;
        self
    }

    #[inline]
    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    /// The caller's frame, `None` for the chain root or an unlinked frame.
    #[inline]
    pub fn back(&self) -> Option<FrameId> {
        self.back
    }

    #[inline]
    pub fn code(&self) -> &Arc<CodeInfo> {
        &self.code
    }

    /// Thread the record was created on.
    #[inline]
    pub fn owner(&self) -> ThreadId {
        self.owner
    }

    #[inline]
    pub fn line(&self) -> u32 {
        self.line
    }

    #[inline]
    pub fn is_traced(&self) -> bool {
        self.traced
    }

    /// Whether the record is currently pushed, anywhere in the chain.
    #[inline]
    pub fn is_on_stack(&self) -> bool {
        self.on_stack
    }
}

// =============================================================================
// FrameArena
// =============================================================================

#[derive(Debug)]
struct Slot {
    generation: u32,
    record: Option<FrameRecord>,
}

/// Storage for all frame records of one thread state.
#[derive(Debug, Default)]
pub struct FrameArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl FrameArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Store `record` holding `refcount` references.
    pub fn insert(&mut self, mut record: FrameRecord, refcount: u32) -> FrameId {
        contract!(refcount >= 1, "frame inserted without an owner");
        record.refcount = refcount;
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.record = Some(record);
            FrameId { index, generation: slot.generation }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot { generation: 0, record: Some(record) });
            FrameId { index, generation: 0 }
        }
    }

    /// Look up a record; `None` if the id is stale.
    pub fn get(&self, id: FrameId) -> Option<&FrameRecord> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.record.as_ref()
    }

    pub fn get_mut(&mut self, id: FrameId) -> Option<&mut FrameRecord> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.record.as_mut()
    }

    /// Look up a record that must be live and well-formed.
    #[track_caller]
    pub fn check(&self, id: FrameId) -> &FrameRecord {
        match self.get(id) {
            Some(record) => {
                require!(record.refcount > 0, "frame {} has no references", id);
                require!(record.code.is_well_formed(), "frame {} has malformed code {:?}", id, record.code);
                record
            }
            None => cofra_common_core::contract_violation(format_args!("frame {} is stale", id)),
        }
    }

    #[track_caller]
    pub fn check_mut(&mut self, id: FrameId) -> &mut FrameRecord {
        self.check(id);
        match self.get_mut(id) {
            Some(record) => record,
            None => cofra_common_core::contract_violation(format_args!("frame {} is stale", id)),
        }
    }

    /// Add one reference.
    #[track_caller]
    pub fn retain(&mut self, id: FrameId) {
        self.check_mut(id).refcount += 1;
    }

    /// Drop one reference, freeing the record and releasing up the chain as
    /// counts reach zero.
    #[track_caller]
    pub fn release(&mut self, id: FrameId) {
        let mut next = Some(id);
        while let Some(id) = next.take() {
            let record = self.check_mut(id);
            record.refcount -= 1;
            if record.refcount == 0 {
                next = self.remove(id).back;
            }
        }
    }

    fn remove(&mut self, id: FrameId) -> FrameRecord {
        let slot = &mut self.slots[id.index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        match slot.record.take() {
            Some(record) => record,
            None => cofra_common_core::contract_violation(format_args!("frame {} freed twice", id)),
        }
    }
}
