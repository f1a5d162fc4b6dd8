//! # cofra-frames
//!
//! Frame stack manager for compiled code that has to look like an
//! interpreter from the outside.
//!
//! Compiled routines do not need interpreter frames to run, but tracebacks
//! and line-number introspection do. This crate keeps, per thread, a chain of
//! reference-counted frame records that mirrors the interpreter's call stack:
//! - `ThreadState` - the current frame and the arena of records
//! - `FrameGuard` - push on entry, pop on scope exit, line updates, detach
//! - `SlotFrameGuard` - the same through a reassignable `FrameSlot`
//! - `FrameAllocator` - source of fresh records for detach
//!
//! Misuse (stale ids, unbalanced pops, self-links) is fatal; see
//! `cofra_common_core`.

mod allocator;
mod arena;
mod code;
mod error;
mod guard;
mod thread_state;

pub use allocator::{FrameAllocator, FreshFrames};
pub use arena::{FrameArena, FrameId, FrameRecord};
pub use code::CodeInfo;
pub use error::FrameError;
pub use guard::{FrameGuard, FrameSlot, SlotFrameGuard};
pub use thread_state::{ThreadState, TraceEntry};
