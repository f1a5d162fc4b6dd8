//! # cofra-common-core
//!
//! Contract checks shared by the frame stack manager and the fiber engine.
//!
//! Every misuse of the primitives (stale frame ids, unbalanced pops, a
//! double release, resuming a dead fiber) is a defect in the caller, never an
//! external failure, so it is reported as fatal instead of as an error value:
//! - `require!` - always on, used for the cheap well-formedness checks
//! - `contract!` - on in debug builds and with the `checked` feature
//!   (enabled by default), compiled out otherwise
//!
//! Both route through [`contract_violation`], which logs the violation and
//! panics. Embedders that build with `panic = "abort"` get abort semantics.

use std::fmt;
use std::panic::Location;

/// Whether `contract!` checks are compiled in.
pub const CHECKED: bool = cfg!(any(debug_assertions, feature = "checked"));

/// Check a precondition in checked builds.
#[macro_export]
macro_rules! contract {
    ($cond:expr, $($arg:tt)+) => {
        if $crate::CHECKED && !($cond) {
            $crate::contract_violation(format_args!($($arg)+))
        }
    };
}

/// Check a precondition in every build.
#[macro_export]
macro_rules! require {
    ($cond:expr, $($arg:tt)+) => {
        if !($cond) {
            $crate::contract_violation(format_args!($($arg)+))
        }
    };
}

/// Report a broken contract. Never returns.
#[cold]
#[inline(never)]
#[track_caller]
pub fn contract_violation(args: fmt::Arguments<'_>) -> ! {
    let location = Location::caller();
    tracing::error!(%location, "contract violation: {}", args);
    panic!("contract violation: {}", args)
}

/// Report that a resource the runtime cannot work without is gone.
#[cold]
#[inline(never)]
#[track_caller]
pub fn resource_exhausted(what: &str, err: &dyn fmt::Display) -> ! {
    let location = Location::caller();
    tracing::error!(%location, "resource exhausted: {}: {}", what, err);
    panic!("resource exhausted: {}: {}", what, err)
}
