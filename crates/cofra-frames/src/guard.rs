//! Scoped frame guards used by generated routine bodies.
//!
//! ```text
//! routine entry                         routine exit (guard drop)
//! -------------                         -------------------------
//! current ----> A                       current ----> A
//!               ^
//!               | back (+1 on A)        B.back = None (-1 on A)
//!               B  <---- current        B guard ref released (-1 on B)
//! ```
//!
//! [`FrameGuard`] owns the frame id it was created with. [`SlotFrameGuard`]
//! reads the frame through a [`FrameSlot`] on every operation, since the slot's
//! owner (typically a suspendable object) may store a different frame there
//! between guard creation and use.

use std::cell::Cell;
use std::thread;

use crate::allocator::FrameAllocator;
use crate::arena::FrameId;
use crate::error::FrameError;
use crate::thread_state::ThreadState;

// =============================================================================
// FrameGuard
// =============================================================================

/// Keeps a frame pushed for the guard's lifetime.
#[derive(Debug)]
pub struct FrameGuard<'ts> {
    ts: &'ts ThreadState,
    frame: FrameId,
}

impl<'ts> FrameGuard<'ts> {
    /// Push `frame` as the current frame of `ts`.
    ///
    /// The frame must be unlinked; the caller keeps its own reference and
    /// the guard adds one until it is dropped.
    #[track_caller]
    pub fn enter(ts: &'ts ThreadState, frame: FrameId) -> Self {
        ts.push(frame);
        Self { ts, frame }
    }

    /// Like [`FrameGuard::enter`], with the preconditions reported as errors.
    pub fn try_enter(ts: &'ts ThreadState, frame: FrameId) -> Result<Self, FrameError> {
        check_enterable(ts, frame)?;
        Ok(Self::enter(ts, frame))
    }

    #[inline]
    pub fn frame(&self) -> FrameId {
        self.frame
    }

    /// The frame with an added reference, for storing past the guard.
    #[track_caller]
    pub fn get_frame(&self) -> FrameId {
        self.ts.incref(self.frame)
    }

    #[track_caller]
    pub fn set_line_number(&self, line: u32) {
        self.ts.set_line(self.frame, line);
    }

    /// Replace the frame by a fresh one at the same chain position, starting
    /// a new line history. The old frame keeps any references held outside
    /// this guard.
    #[track_caller]
    pub fn detach_frame(&mut self, allocator: &mut dyn FrameAllocator) {
        self.frame = self.ts.detach(self.frame, allocator, 1);
    }
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.ts.pop_unwinding(self.frame);
        } else {
            self.ts.pop(self.frame);
        }
    }
}

// =============================================================================
// FrameSlot / SlotFrameGuard
// =============================================================================

/// A reassignable location holding one owned frame reference.
#[derive(Debug)]
pub struct FrameSlot(Cell<FrameId>);

impl FrameSlot {
    /// Take over the caller's reference to `frame`.
    pub fn new(frame: FrameId) -> Self {
        Self(Cell::new(frame))
    }

    #[inline]
    pub fn get(&self) -> FrameId {
        self.0.get()
    }

    /// Store a frame, handing back the previously owned one.
    pub fn replace(&self, frame: FrameId) -> FrameId {
        self.0.replace(frame)
    }

    /// Give up the slot, returning its owned reference.
    pub fn into_inner(self) -> FrameId {
        self.0.into_inner()
    }
}

/// Frame guard operating through a [`FrameSlot`].
#[derive(Debug)]
pub struct SlotFrameGuard<'a> {
    ts: &'a ThreadState,
    slot: &'a FrameSlot,
}

impl<'a> SlotFrameGuard<'a> {
    #[track_caller]
    pub fn enter(ts: &'a ThreadState, slot: &'a FrameSlot) -> Self {
        ts.push(slot.get());
        Self { ts, slot }
    }

    pub fn try_enter(ts: &'a ThreadState, slot: &'a FrameSlot) -> Result<Self, FrameError> {
        check_enterable(ts, slot.get())?;
        Ok(Self::enter(ts, slot))
    }

    #[inline]
    pub fn frame(&self) -> FrameId {
        self.slot.get()
    }

    #[track_caller]
    pub fn get_frame(&self) -> FrameId {
        self.ts.incref(self.slot.get())
    }

    #[track_caller]
    pub fn set_line_number(&self, line: u32) {
        self.ts.set_line(self.slot.get(), line);
    }

    /// Detach and store the replacement in the slot. Both the slot's and the
    /// guard's references move to the new frame.
    #[track_caller]
    pub fn detach_frame(&self, allocator: &mut dyn FrameAllocator) {
        let replacement = self.ts.detach(self.slot.get(), allocator, 2);
        self.slot.replace(replacement);
    }
}

impl Drop for SlotFrameGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.ts.pop_unwinding(self.slot.get());
        } else {
            self.ts.pop(self.slot.get());
        }
    }
}

fn check_enterable(ts: &ThreadState, frame: FrameId) -> Result<(), FrameError> {
    let Some(record) = ts.peek(frame) else {
        return Err(FrameError::Stale(frame));
    };
    if !record.code().is_well_formed() {
        return Err(FrameError::Malformed(frame));
    }
    if ts.current() == Some(frame) {
        return Err(FrameError::AlreadyCurrent(frame));
    }
    if let Some(back) = record.back() {
        return Err(FrameError::Linked(frame, back));
    }
    if record.is_on_stack() {
        return Err(FrameError::OnStack(frame));
    }
    Ok(())
}
