//! # cofra-fiber
//!
//! Stackful coroutine engine for compiled suspendable routines.
//!
//! - `Fiber` - one independently stacked context: prepare, resume, release
//! - `Suspender` - the fiber-side half of the transfer pair
//! - `stack_pool` - fixed-size stacks with a one-slot reuse cache
//! - `abi` - `extern "C"` entry points for generated code
//!
//! Scheduling is entirely cooperative: control moves only through
//! `Fiber::resume` and `Suspender::suspend`.

pub mod abi;
mod error;
mod fiber;
pub mod stack_pool;

pub use error::FiberError;
pub use fiber::{Fiber, FiberState, Suspender, Transfer};
pub use stack_pool::{PoolStats, Recycle, StackPool, STACK_SIZE};
