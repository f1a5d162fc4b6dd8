//! Fibers: independently stacked, explicitly switched execution contexts.
//!
//! # Lifecycle
//!
//! ```text
//! Fiber::new ──> Idle ──prepare──> Prepared ──resume──> Suspended ──resume──> ...
//!                                      │                    │
//!                                      └──────resume────────┴──> Finished
//!                           release (from Prepared/Suspended/Finished) ──> Released
//! ```
//!
//! Control enters a fiber only through [`Fiber::resume`] and leaves it only
//! through [`Suspender::suspend`] or by returning from the entry. Nothing
//! else yields.

use std::fmt;
use std::mem;
use std::thread;

use cofra_common_core::{contract, contract_violation, resource_exhausted};
use corosensei::stack::DefaultStack;
use corosensei::{Coroutine, CoroutineResult, Yielder};

use crate::error::FiberError;
use crate::stack_pool::{self, Recycle, STACK_SIZE};

type Context = Coroutine<u64, u64, u64, DefaultStack>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    /// Initialized, no stack attached.
    Idle,
    /// Stack and entry bound, never entered.
    Prepared,
    /// Parked in `Suspender::suspend`.
    Suspended,
    /// Entry returned or panicked.
    Finished,
    /// Stack handed back to the pool.
    Released,
}

/// Result of transferring control into a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// The fiber suspended with a value.
    Suspended(u64),
    /// The fiber's entry returned a value.
    Finished(u64),
}

/// Handle through which a running fiber gives control back to its resumer.
pub struct Suspender<'a> {
    yielder: &'a Yielder<u64, u64>,
}

impl Suspender<'_> {
    /// Save this fiber and resume the context that resumed it. Returns the
    /// value passed to the next [`Fiber::resume`].
    #[inline]
    pub fn suspend(&self, value: u64) -> u64 {
        self.yielder.suspend(value)
    }
}

pub struct Fiber {
    context: Option<Context>,
    state: FiberState,
}

impl Fiber {
    /// An idle fiber with no stack.
    pub fn new() -> Self {
        Self {
            context: None,
            state: FiberState::Idle,
        }
    }

    #[inline]
    pub fn state(&self) -> FiberState {
        self.state
    }

    #[inline]
    pub fn has_stack(&self) -> bool {
        self.context.is_some()
    }

    /// Attach a stack and bind `entry(suspender, argument)` as the code the
    /// first resume runs. Stack allocation failure is fatal.
    #[track_caller]
    pub fn prepare<F>(&mut self, entry: F, argument: u64)
    where
        F: FnOnce(&Suspender<'_>, u64) -> u64 + 'static,
    {
        contract!(self.state == FiberState::Idle, "preparing a fiber that is {:?}", self.state);
        match self.try_prepare(entry, argument) {
            Ok(()) => {}
            Err(FiberError::StackAllocation { source, .. }) => {
                resource_exhausted("fiber stack", &source)
            }
            Err(err) => contract_violation(format_args!("{}", err)),
        }
    }

    /// [`Fiber::prepare`] with failures reported to the caller.
    pub fn try_prepare<F>(&mut self, entry: F, argument: u64) -> Result<(), FiberError>
    where
        F: FnOnce(&Suspender<'_>, u64) -> u64 + 'static,
    {
        if self.state != FiberState::Idle {
            return Err(FiberError::NotIdle(self.state));
        }

        let reused = stack_pool::has_spare();
        let stack = stack_pool::acquire()
            .map_err(|source| FiberError::StackAllocation { size: STACK_SIZE, source })?;

        // The first resume value is ignored; the entry gets `argument`.
        let context = Coroutine::with_stack(stack, move |yielder: &Yielder<u64, u64>, _first: u64| {
            let suspender = Suspender { yielder };
            entry(&suspender, argument)
        });

        self.context = Some(context);
        self.state = FiberState::Prepared;
        tracing::trace!(reused, argument, "prepared fiber");
        Ok(())
    }

    /// Transfer control into the fiber until it suspends or finishes.
    ///
    /// Panics raised inside the fiber propagate out of this call.
    #[track_caller]
    pub fn resume(&mut self, value: u64) -> Transfer {
        contract!(
            matches!(self.state, FiberState::Prepared | FiberState::Suspended),
            "resuming a fiber that is {:?}",
            self.state
        );
        let Some(context) = self.context.as_mut() else {
            contract_violation(format_args!("resuming a fiber without a stack"))
        };

        // A panic escaping the entry completes the coroutine, so the fiber
        // counts as finished unless it suspends.
        self.state = FiberState::Finished;
        match context.resume(value) {
            CoroutineResult::Yield(value) => {
                self.state = FiberState::Suspended;
                Transfer::Suspended(value)
            }
            CoroutineResult::Return(value) => Transfer::Finished(value),
        }
    }

    /// Hand the stack back: cached as the pool's spare if the slot is empty,
    /// freed otherwise. A suspended fiber is unwound first.
    #[track_caller]
    pub fn release(&mut self) -> Recycle {
        contract!(self.state != FiberState::Released, "fiber released twice");
        let Some(mut context) = self.context.take() else {
            contract_violation(format_args!("releasing a fiber that is {:?}", self.state))
        };

        if context.started() && !context.done() {
            context.force_unwind();
        }
        let stack = context.into_stack();
        let outcome = stack_pool::recycle(stack);
        tracing::debug!(state = ?self.state, ?outcome, "released fiber");
        self.state = FiberState::Released;
        outcome
    }
}

impl Default for Fiber {
    fn default() -> Self {
        Self::new()
    }
}

impl Fiber {
    /// Release while the thread is already panicking. Unwinding a suspended
    /// fiber here would raise a second panic, so its stack is leaked instead.
    fn release_unwinding(&mut self) {
        let Some(context) = self.context.take() else {
            return;
        };
        self.state = FiberState::Released;
        if context.started() && !context.done() {
            tracing::warn!("leaking the stack of a suspended fiber dropped during a panic");
            mem::forget(context);
        } else {
            stack_pool::recycle(context.into_stack());
        }
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        if self.context.is_none() {
            return;
        }
        if thread::panicking() {
            self.release_unwinding();
        } else {
            self.release();
        }
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("state", &self.state)
            .field("has_stack", &self.has_stack())
            .finish()
    }
}
