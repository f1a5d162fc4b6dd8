//! Allocation of replacement frames for detach.

use crate::arena::FrameRecord;

/// Produces a structurally fresh record to stand in for a detached frame.
///
/// Implemented by the layer that owns routine metadata. The returned record
/// must be unlinked; the frame manager links it into the detached frame's
/// position.
pub trait FrameAllocator {
    fn allocate(&mut self, detached: &FrameRecord) -> FrameRecord;
}

impl<F> FrameAllocator for F
where
    F: FnMut(&FrameRecord) -> FrameRecord,
{
    fn allocate(&mut self, detached: &FrameRecord) -> FrameRecord {
        self(detached)
    }
}

/// Default allocator: same code, line reset to the routine's first line,
/// trace flag carried over.
#[derive(Debug, Clone, Copy, Default)]
pub struct FreshFrames;

impl FrameAllocator for FreshFrames {
    fn allocate(&mut self, detached: &FrameRecord) -> FrameRecord {
        FrameRecord::new(detached.code().clone()).with_trace(detached.is_traced())
    }
}
