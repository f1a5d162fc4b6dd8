//! C ABI for generated code.
//!
//! Generated routine bodies cannot name Rust closures, so they drive fibers
//! through these `extern "C"` entry points with an entry function address and
//! one machine-word argument.
//!
//! ```text
//! Generated code                     Fiber engine
//! --------------                     ------------
//!    |-- cofra_fiber_new() ---------->|  Idle fiber (no stack)
//!    |-- cofra_fiber_prepare() ------>|  Bind stack + entry(ctx, arg)
//!    |-- cofra_fiber_resume() ------->|  Run until suspend/return
//!    |<- cofra_fiber_suspend() -------|  (inside the fiber) back to resumer
//!    |-- cofra_fiber_release() ------>|  Stack to pool or freed
//!    |-- cofra_fiber_free() --------->|  Drop the fiber object
//! ```

use std::ffi::c_void;

use crate::fiber::{Fiber, Suspender, Transfer};

/// Entry function of a fiber prepared through the C ABI.
///
/// `ctx` is only valid for the duration of the call and must be passed to
/// [`cofra_fiber_suspend`] to give control back.
pub type FiberEntryFn = extern "C" fn(ctx: *const c_void, arg: u64) -> u64;

/// Outcome of [`cofra_fiber_resume`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberStatus {
    /// The fiber suspended; `out` holds the suspended value.
    Suspended = 0,
    /// The fiber returned; `out` holds the return value.
    Finished = 1,
}

/// Allocate an idle fiber.
#[no_mangle]
pub extern "C" fn cofra_fiber_new() -> *mut Fiber {
    Box::into_raw(Box::new(Fiber::new()))
}

/// Bind a stack and `entry(ctx, arg)` to an idle fiber.
///
/// # Safety
/// - `fiber` must come from `cofra_fiber_new` and not be freed
#[no_mangle]
pub unsafe extern "C" fn cofra_fiber_prepare(fiber: *mut Fiber, entry: FiberEntryFn, arg: u64) {
    let fiber = &mut *fiber;
    fiber.prepare(
        move |suspender, arg| entry(suspender as *const Suspender<'_> as *const c_void, arg),
        arg,
    );
}

/// Resume a prepared or suspended fiber.
///
/// # Safety
/// - `fiber` must come from `cofra_fiber_new` and not be freed
/// - `out` must be valid for one `u64` write
#[no_mangle]
pub unsafe extern "C" fn cofra_fiber_resume(fiber: *mut Fiber, value: u64, out: *mut u64) -> FiberStatus {
    let fiber = &mut *fiber;
    match fiber.resume(value) {
        Transfer::Suspended(v) => {
            *out = v;
            FiberStatus::Suspended
        }
        Transfer::Finished(v) => {
            *out = v;
            FiberStatus::Finished
        }
    }
}

/// Give control back to the resumer from inside a fiber.
///
/// # Safety
/// - `ctx` must be the context passed to the running fiber's entry function
#[no_mangle]
pub unsafe extern "C" fn cofra_fiber_suspend(ctx: *const c_void, value: u64) -> u64 {
    let suspender = &*(ctx as *const Suspender<'_>);
    suspender.suspend(value)
}

/// Return the fiber's stack to the pool.
///
/// # Safety
/// - `fiber` must come from `cofra_fiber_new` and not be freed
#[no_mangle]
pub unsafe extern "C" fn cofra_fiber_release(fiber: *mut Fiber) {
    (*fiber).release();
}

/// Drop a fiber object, releasing its stack if still attached.
///
/// # Safety
/// - `fiber` must come from `cofra_fiber_new`; it is invalid afterwards
#[no_mangle]
pub unsafe extern "C" fn cofra_fiber_free(fiber: *mut Fiber) {
    drop(Box::from_raw(fiber));
}

// =============================================================================
// Symbol Registration
// =============================================================================

/// All fiber symbols as (name, address) pairs, for registration with a JIT
/// symbol resolver.
pub fn runtime_symbols() -> Vec<(&'static str, *const u8)> {
    vec![
        ("cofra_fiber_new", cofra_fiber_new as *const u8),
        ("cofra_fiber_prepare", cofra_fiber_prepare as *const u8),
        ("cofra_fiber_resume", cofra_fiber_resume as *const u8),
        ("cofra_fiber_suspend", cofra_fiber_suspend as *const u8),
        ("cofra_fiber_release", cofra_fiber_release as *const u8),
        ("cofra_fiber_free", cofra_fiber_free as *const u8),
    ]
}
