//! Per-thread frame bookkeeping.
//!
//! A [`ThreadState`] owns the frame arena and the pointer to the current
//! (innermost) frame. It is an explicit context object: generated code passes
//! it by reference to every guard. Interior mutability keeps nested guards
//! simple, and makes the type `!Sync`, so it is never shared between threads.

use std::cell::{Cell, Ref, RefCell};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use cofra_common_core::{contract, require};
use tracing::Level;

use crate::allocator::FrameAllocator;
use crate::arena::{FrameArena, FrameId, FrameRecord};
use crate::code::CodeInfo;

const DUMP_TARGET: &str = "cofra_frames::dump";

/// One line of a traceback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    pub code: Arc<CodeInfo>,
    pub line: u32,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} in {}", self.code.file, self.line, self.code.name)
    }
}

#[derive(Debug)]
pub struct ThreadState {
    arena: RefCell<FrameArena>,
    current: Cell<Option<FrameId>>,
    thread: ThreadId,
}

impl ThreadState {
    pub fn new() -> Self {
        Self {
            arena: RefCell::new(FrameArena::new()),
            current: Cell::new(None),
            thread: thread::current().id(),
        }
    }

    /// Thread this state was created on.
    #[inline]
    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    /// The logical top of stack.
    #[inline]
    pub fn current(&self) -> Option<FrameId> {
        self.current.get()
    }

    /// Create an unlinked frame for `code`. The caller owns one reference.
    pub fn new_frame(&self, code: Arc<CodeInfo>) -> FrameId {
        require!(code.is_well_formed(), "malformed code {:?}", code);
        self.arena.borrow_mut().insert(FrameRecord::new(code), 1)
    }

    /// Add a strong reference and hand the id back.
    #[track_caller]
    pub fn incref(&self, frame: FrameId) -> FrameId {
        self.arena.borrow_mut().retain(frame);
        frame
    }

    /// Drop a strong reference.
    #[track_caller]
    pub fn release(&self, frame: FrameId) {
        self.arena.borrow_mut().release(frame);
    }

    /// Borrow a live record.
    #[track_caller]
    pub fn record(&self, frame: FrameId) -> Ref<'_, FrameRecord> {
        Ref::map(self.arena.borrow(), |arena| arena.check(frame))
    }

    /// Borrow a record without the well-formedness check.
    pub(crate) fn peek(&self, frame: FrameId) -> Option<Ref<'_, FrameRecord>> {
        Ref::filter_map(self.arena.borrow(), |arena| arena.get(frame)).ok()
    }

    /// Whether `frame` still refers to a live record.
    pub fn is_live(&self, frame: FrameId) -> bool {
        self.arena.borrow().get(frame).is_some()
    }

    pub fn live_frames(&self) -> usize {
        self.arena.borrow().len()
    }

    #[track_caller]
    pub fn back(&self, frame: FrameId) -> Option<FrameId> {
        self.record(frame).back
    }

    #[track_caller]
    pub fn line_number(&self, frame: FrameId) -> u32 {
        self.record(frame).line
    }

    #[track_caller]
    pub fn refcount(&self, frame: FrameId) -> u32 {
        self.record(frame).refcount
    }

    /// Mark a frame as observed by an external trace hook. While traced, the
    /// hook owns line updates.
    #[track_caller]
    pub fn set_trace(&self, frame: FrameId, traced: bool) {
        self.arena.borrow_mut().check_mut(frame).traced = traced;
    }

    /// Number of frames reachable from the current frame.
    pub fn depth(&self) -> usize {
        let arena = self.arena.borrow();
        let mut depth = 0;
        let mut cursor = self.current.get();
        while let Some(frame) = cursor {
            depth += 1;
            cursor = arena.check(frame).back;
        }
        depth
    }

    /// The current chain, innermost first.
    pub fn traceback(&self) -> Vec<TraceEntry> {
        let arena = self.arena.borrow();
        let mut entries = Vec::new();
        let mut cursor = self.current.get();
        while let Some(frame) = cursor {
            let record = arena.check(frame);
            entries.push(TraceEntry { code: record.code.clone(), line: record.line });
            cursor = record.back;
        }
        entries
    }

    /// Log the whole chain at `TRACE` level.
    pub fn dump_frame_stack(&self) {
        let entries = self.traceback();
        tracing::trace!(target: DUMP_TARGET, ">--------->");
        let total = entries.len();
        for (i, entry) in entries.iter().enumerate() {
            tracing::trace!(target: DUMP_TARGET, "frame stack {}: {}", total - i, entry);
        }
        tracing::trace!(target: DUMP_TARGET, ">---------<");
    }

    /// Whether a cached frame cannot be handed out again: it is missing,
    /// still referenced elsewhere, created on another thread, or still
    /// linked or pushed.
    pub fn is_frame_unusable(&self, frame: Option<FrameId>) -> bool {
        let Some(frame) = frame else {
            return true;
        };
        let arena = self.arena.borrow();
        match arena.get(frame) {
            None => true,
            Some(record) => {
                record.refcount > 1
                    || record.owner != thread::current().id()
                    || record.back.is_some()
                    || record.on_stack
            }
        }
    }

    /// Hand out a cached frame for a new activation of its routine, with the
    /// line reset to the routine's first line.
    #[track_caller]
    pub fn reuse_frame(&self, frame: FrameId) -> FrameId {
        {
            let arena = self.arena.borrow();
            let record = arena.check(frame);
            require!(
                record.owner == thread::current().id(),
                "frame {} reused off its creation thread",
                frame
            );
        }
        contract!(!self.is_frame_unusable(Some(frame)), "frame {} is still in use", frame);
        let mut arena = self.arena.borrow_mut();
        let record = arena.check_mut(frame);
        record.line = record.code.first_line;
        frame
    }

    // =========================================================================
    // Guard primitives
    // =========================================================================

    #[track_caller]
    pub(crate) fn push(&self, frame: FrameId) {
        {
            let mut arena = self.arena.borrow_mut();
            let old = self.current.get();

            // No recursion onto the same record.
            contract!(old != Some(frame), "frame {} pushed onto itself", frame);
            // Cached records must come in unlinked.
            let record = arena.check(frame);
            let back = record.back;
            contract!(back.is_none(), "frame {} is still linked under {:?}", frame, back);
            // The chain root is unlinked too; re-pushing it would close a cycle.
            require!(!record.on_stack, "frame {} is already on the stack", frame);

            if let Some(old) = old {
                arena.retain(old);
                arena.check_mut(frame).back = Some(old);
            }
            arena.check_mut(frame).on_stack = true;
            arena.retain(frame);
            self.current.set(Some(frame));
            tracing::trace!(frame = %frame, back = ?old, "push frame");
        }

        if tracing::enabled!(target: DUMP_TARGET, Level::TRACE) {
            self.dump_frame_stack();
        }
    }

    #[track_caller]
    pub(crate) fn pop(&self, frame: FrameId) {
        let current = self.current.get();
        contract!(current == Some(frame), "popping frame {} but {:?} is current", frame, current);

        let mut arena = self.arena.borrow_mut();
        let record = arena.check_mut(frame);
        record.on_stack = false;
        let back = record.back.take();
        self.current.set(back);
        contract!(self.current.get() != Some(frame), "frame {} linked under itself", frame);

        // Release the back reference first, then the guard's own.
        if let Some(back) = back {
            arena.release(back);
        }
        arena.release(frame);
        tracing::trace!(frame = %frame, current = ?back, "pop frame");
    }

    /// Pop during unwinding: only if the chain is still consistent, so a
    /// second contract panic cannot abort the process.
    pub(crate) fn pop_unwinding(&self, frame: FrameId) {
        if self.current.get() == Some(frame) && self.is_live(frame) {
            self.pop(frame);
        }
    }

    #[track_caller]
    pub(crate) fn set_line(&self, frame: FrameId, line: u32) {
        contract!(line >= 1, "line number {} for frame {}", line, frame);
        let mut arena = self.arena.borrow_mut();
        let record = arena.check_mut(frame);
        // A trace hook drives line numbers itself.
        contract!(!record.traced, "frame {} is traced", frame);
        record.line = line;
    }

    /// Replace the current frame by a fresh record at the same position.
    ///
    /// `owned` is the number of references the replaced holder had on the
    /// old frame; they move to the new frame.
    #[track_caller]
    pub(crate) fn detach(&self, frame: FrameId, allocator: &mut dyn FrameAllocator, owned: u32) -> FrameId {
        let current = self.current.get();
        contract!(current == Some(frame), "detaching frame {} but {:?} is current", frame, current);

        // The allocator runs without the arena borrowed, so it may call back
        // into this thread state.
        let detached = FrameRecord::clone(&self.record(frame));
        let mut fresh = allocator.allocate(&detached);
        contract!(fresh.back.is_none(), "allocator returned a linked frame");
        let current = self.current.get();
        contract!(current == Some(frame), "allocator moved the current frame to {:?}", current);

        let mut arena = self.arena.borrow_mut();
        let record = arena.check_mut(frame);
        record.on_stack = false;
        fresh.back = record.back.take();
        fresh.on_stack = true;
        let replacement = arena.insert(fresh, owned);
        self.current.set(Some(replacement));

        for _ in 0..owned {
            arena.release(frame);
        }
        tracing::trace!(old = %frame, new = %replacement, "detach frame");
        replacement
    }
}

impl Default for ThreadState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(name: &str) -> Arc<CodeInfo> {
        Arc::new(CodeInfo::new(name, "test.py", 1))
    }

    #[test]
    fn test_new_frame_is_owned_by_creator() {
        let ts = ThreadState::new();
        let f = ts.new_frame(code("f"));
        assert_eq!(ts.refcount(f), 1);
        assert_eq!(ts.back(f), None);
        assert_eq!(ts.current(), None);
        assert_eq!(ts.live_frames(), 1);

        ts.release(f);
        assert!(!ts.is_live(f));
        assert_eq!(ts.live_frames(), 0);
    }

    #[test]
    fn test_incref_release() {
        let ts = ThreadState::new();
        let f = ts.new_frame(code("f"));
        assert_eq!(ts.incref(f), f);
        assert_eq!(ts.refcount(f), 2);
        ts.release(f);
        assert_eq!(ts.refcount(f), 1);
    }

    #[test]
    fn test_unusable_frames() {
        let ts = ThreadState::new();
        assert!(ts.is_frame_unusable(None));

        let f = ts.new_frame(code("f"));
        assert!(!ts.is_frame_unusable(Some(f)));

        // Still referenced elsewhere.
        ts.incref(f);
        assert!(ts.is_frame_unusable(Some(f)));
        ts.release(f);

        // Still linked.
        let root = ts.new_frame(code("root"));
        ts.push(root);
        ts.push(f);
        ts.release(f); // drop the push reference only for this check
        assert!(ts.is_frame_unusable(Some(f)));
        ts.incref(f);
        ts.pop(f);
        ts.pop(root);
        assert!(!ts.is_frame_unusable(Some(f)));

        ts.release(f);
        assert!(ts.is_frame_unusable(Some(f)));
    }

    #[test]
    fn test_frame_from_other_thread_is_unusable() {
        let ts = ThreadState::new();
        let f = ts.new_frame(code("f"));
        let unusable = thread::spawn(move || ts.is_frame_unusable(Some(f)))
            .join()
            .unwrap();
        assert!(unusable);
    }

    #[test]
    #[should_panic(expected = "reused off its creation thread")]
    fn test_reuse_on_other_thread_is_fatal() {
        let ts = ThreadState::new();
        let f = ts.new_frame(code("f"));
        let result = thread::spawn(move || {
            ts.reuse_frame(f);
        })
        .join();
        if let Err(payload) = result {
            std::panic::resume_unwind(payload);
        }
    }

    #[test]
    fn test_reuse_resets_line() {
        let ts = ThreadState::new();
        let f = ts.new_frame(Arc::new(CodeInfo::new("f", "test.py", 7)));
        ts.push(f);
        ts.set_line(f, 20);
        ts.pop(f);
        assert_eq!(ts.line_number(f), 20);

        assert_eq!(ts.reuse_frame(f), f);
        assert_eq!(ts.line_number(f), 7);
    }

    #[test]
    fn test_traceback_innermost_first() {
        let ts = ThreadState::new();
        let outer = ts.new_frame(Arc::new(CodeInfo::new("outer", "a.py", 1)));
        let inner = ts.new_frame(Arc::new(CodeInfo::new("inner", "b.py", 10)));
        ts.push(outer);
        ts.set_line(outer, 3);
        ts.push(inner);
        ts.set_line(inner, 12);

        let lines: Vec<String> = ts.traceback().iter().map(|e| e.to_string()).collect();
        assert_eq!(lines, vec!["b.py:12 in inner", "a.py:3 in outer"]);
        assert_eq!(ts.depth(), 2);

        ts.pop(inner);
        ts.pop(outer);
        assert_eq!(ts.depth(), 0);
        assert!(ts.traceback().is_empty());
    }
}
