//! Fiber errors surfaced at integration boundaries.

use std::io;

use thiserror::Error;

use crate::fiber::FiberState;

#[derive(Debug, Error)]
pub enum FiberError {
    #[error("failed to allocate a {size}-byte fiber stack")]
    StackAllocation {
        size: usize,
        #[source]
        source: io::Error,
    },
    #[error("fiber is {0:?}, expected Idle")]
    NotIdle(FiberState),
}
