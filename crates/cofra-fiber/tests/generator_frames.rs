//! Frames of suspendable routines across fiber switches.
//!
//! A generator-like routine owns its frame through a `FrameSlot`. Each
//! activation pushes it under whichever frame resumed the fiber and pops it
//! before suspending, so the shared chain never points into a parked fiber.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use cofra_fiber::{Fiber, Transfer};
use cofra_frames::{CodeInfo, FrameGuard, FrameId, FrameSlot, FreshFrames, SlotFrameGuard, ThreadState};
use pretty_assertions::assert_eq;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn code(name: &str, first_line: u32) -> Arc<CodeInfo> {
    Arc::new(CodeInfo::new(name, "gen.py", first_line))
}

/// What the generator saw while its frame was pushed.
#[derive(Debug, PartialEq, Eq)]
struct Activation {
    back: Option<FrameId>,
    depth: usize,
    line: u32,
}

fn spawn_counter(ts: &Rc<ThreadState>, slot: &Rc<FrameSlot>, seen: &Rc<RefCell<Vec<Activation>>>, limit: u64) -> Fiber {
    let (ts, slot, seen) = (ts.clone(), slot.clone(), seen.clone());
    let mut fiber = Fiber::new();
    fiber.prepare(
        move |suspender, limit| {
            for i in 0..limit {
                {
                    let guard = SlotFrameGuard::enter(&ts, &slot);
                    guard.set_line_number(11 + i as u32);
                    seen.borrow_mut().push(Activation {
                        back: ts.back(guard.frame()),
                        depth: ts.depth(),
                        line: ts.line_number(guard.frame()),
                    });
                }
                suspender.suspend(i);
            }
            limit
        },
        limit,
    );
    fiber
}

#[test]
fn generator_frame_survives_suspension() {
    init_tracing();
    let ts = Rc::new(ThreadState::new());
    let main = ts.new_frame(code("main", 1));
    let slot = Rc::new(FrameSlot::new(ts.new_frame(code("counter", 10))));
    let seen = Rc::new(RefCell::new(Vec::new()));

    let mut fiber = spawn_counter(&ts, &slot, &seen, 3);
    let _main_guard = FrameGuard::enter(&ts, main);

    for expected in 0..3 {
        assert_eq!(fiber.resume(0), Transfer::Suspended(expected));
        // Back on the resumer's side: the generator frame is parked, unlinked
        // and still alive with its line history.
        assert_eq!(ts.current(), Some(main));
        assert_eq!(ts.back(slot.get()), None);
        assert_eq!(ts.refcount(slot.get()), 1);
        assert_eq!(ts.line_number(slot.get()), 11 + expected as u32);
    }
    assert_eq!(fiber.resume(0), Transfer::Finished(3));

    let lines: Vec<u32> = seen.borrow().iter().map(|a| a.line).collect();
    assert_eq!(lines, vec![11, 12, 13]);
    assert!(seen.borrow().iter().all(|a| a.back == Some(main) && a.depth == 2));

    fiber.release();
}

#[test]
fn generator_links_under_each_resumer() {
    let ts = Rc::new(ThreadState::new());
    let first = ts.new_frame(code("first_caller", 1));
    let second = ts.new_frame(code("second_caller", 20));
    let slot = Rc::new(FrameSlot::new(ts.new_frame(code("counter", 10))));
    let seen = Rc::new(RefCell::new(Vec::new()));

    let mut fiber = spawn_counter(&ts, &slot, &seen, 2);
    let root = ts.new_frame(code("root", 1));
    let _root_guard = FrameGuard::enter(&ts, root);

    {
        let _g = FrameGuard::enter(&ts, first);
        assert_eq!(fiber.resume(0), Transfer::Suspended(0));
    }
    {
        let _g = FrameGuard::enter(&ts, second);
        assert_eq!(fiber.resume(0), Transfer::Suspended(1));
    }

    assert_eq!(
        *seen.borrow(),
        vec![
            Activation { back: Some(first), depth: 3, line: 11 },
            Activation { back: Some(second), depth: 3, line: 12 },
        ]
    );
    assert_eq!(ts.current(), Some(root));
    // Dropping the suspended fiber unwinds it; its frame stays in the slot.
    drop(fiber);
    assert!(ts.is_live(slot.get()));
}

#[test]
fn generator_detaches_between_iterations() {
    let ts = Rc::new(ThreadState::new());
    let main = ts.new_frame(code("main", 1));
    let original = ts.new_frame(code("pages", 30));
    let slot = Rc::new(FrameSlot::new(original));

    let mut fiber = Fiber::new();
    {
        let (ts, slot) = (ts.clone(), slot.clone());
        fiber.prepare(
            move |suspender, pages| {
                for page in 0..pages {
                    let guard = SlotFrameGuard::enter(&ts, &slot);
                    if page > 0 {
                        guard.detach_frame(&mut FreshFrames);
                    }
                    guard.set_line_number(31 + page as u32);
                    drop(guard);
                    suspender.suspend(page);
                }
                pages
            },
            3,
        );
    }

    let _main_guard = FrameGuard::enter(&ts, main);
    let mut frames = Vec::new();
    while let Transfer::Suspended(_) = fiber.resume(0) {
        frames.push(slot.get());
        assert_eq!(ts.current(), Some(main));
    }

    // Every page got its own record; only the latest one is still owned.
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0], original);
    assert_ne!(frames[1], frames[0]);
    assert_ne!(frames[2], frames[1]);
    assert!(!ts.is_live(frames[0]));
    assert!(!ts.is_live(frames[1]));
    assert_eq!(ts.line_number(frames[2]), 33);
    assert_eq!(ts.refcount(frames[2]), 1);
}
