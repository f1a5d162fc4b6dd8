//! One-slot stack cache.
//!
//! Keeps a single spare stack around to avoid repeated allocation when
//! fibers are created and released in quick succession (e.g. inside a loop).
//! The first allocation is the expensive part; holding more than one spare
//! buys nothing for that pattern, so at most one is ever retained.
//!
//! The pool is thread-local. The spare stack is freed when the thread exits,
//! or earlier through [`clear`].

use std::cell::RefCell;
use std::io;

use corosensei::stack::DefaultStack;

/// Usable size of every fiber stack.
pub const STACK_SIZE: usize = 1024 * 1024;

/// What happened to a stack handed back to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recycle {
    /// Kept as the spare.
    Cached,
    /// The spare slot was taken; the stack was freed.
    Freed,
}

/// Counters since the pool was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Stacks obtained from the allocator.
    pub allocated: u64,
    /// Stacks served from the spare slot.
    pub reused: u64,
    /// Releases that filled the spare slot.
    pub cached: u64,
    /// Releases that freed their stack.
    pub freed: u64,
}

#[derive(Default)]
pub struct StackPool {
    spare: Option<DefaultStack>,
    stats: PoolStats,
}

impl StackPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the spare stack, or allocate a fresh one.
    pub fn acquire(&mut self) -> io::Result<DefaultStack> {
        if let Some(stack) = self.spare.take() {
            self.stats.reused += 1;
            return Ok(stack);
        }
        let stack = DefaultStack::new(STACK_SIZE)?;
        self.stats.allocated += 1;
        Ok(stack)
    }

    /// Keep `stack` as the spare if the slot is empty, otherwise free it.
    pub fn recycle(&mut self, stack: DefaultStack) -> Recycle {
        if self.spare.is_none() {
            self.spare = Some(stack);
            self.stats.cached += 1;
            Recycle::Cached
        } else {
            drop(stack);
            self.stats.freed += 1;
            Recycle::Freed
        }
    }

    #[inline]
    pub fn has_spare(&self) -> bool {
        self.spare.is_some()
    }

    /// Free the spare stack. Returns whether there was one.
    pub fn clear(&mut self) -> bool {
        self.spare.take().is_some()
    }

    #[inline]
    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}

thread_local! {
    static POOL: RefCell<StackPool> = RefCell::new(StackPool::new());
}

// =============================================================================
// Thread-local pool access
// =============================================================================

pub fn acquire() -> io::Result<DefaultStack> {
    POOL.with(|pool| pool.borrow_mut().acquire())
}

pub fn recycle(stack: DefaultStack) -> Recycle {
    POOL.with(|pool| pool.borrow_mut().recycle(stack))
}

pub fn has_spare() -> bool {
    POOL.with(|pool| pool.borrow().has_spare())
}

pub fn clear() -> bool {
    POOL.with(|pool| pool.borrow_mut().clear())
}

pub fn stats() -> PoolStats {
    POOL.with(|pool| pool.borrow().stats())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recycle_caches_then_frees() {
        let mut pool = StackPool::new();
        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();
        assert_eq!(pool.stats().allocated, 2);
        assert!(!pool.has_spare());

        assert_eq!(pool.recycle(first), Recycle::Cached);
        assert!(pool.has_spare());
        assert_eq!(pool.recycle(second), Recycle::Freed);
        assert!(pool.has_spare());

        assert_eq!(
            pool.stats(),
            PoolStats { allocated: 2, reused: 0, cached: 1, freed: 1 }
        );
    }

    #[test]
    fn test_acquire_drains_spare() {
        let mut pool = StackPool::new();
        let stack = pool.acquire().unwrap();
        pool.recycle(stack);

        let again = pool.acquire().unwrap();
        assert!(!pool.has_spare());
        assert_eq!(pool.stats().reused, 1);
        assert_eq!(pool.stats().allocated, 1);
        pool.recycle(again);
    }

    #[test]
    fn test_clear() {
        let mut pool = StackPool::new();
        assert!(!pool.clear());
        let stack = pool.acquire().unwrap();
        pool.recycle(stack);
        assert!(pool.clear());
        assert!(!pool.has_spare());
    }

    #[test]
    fn test_thread_local_pool() {
        clear();
        let before = stats();
        let stack = acquire().unwrap();
        assert_eq!(recycle(stack), Recycle::Cached);
        assert!(has_spare());
        assert_eq!(stats().cached, before.cached + 1);
        assert!(clear());
        assert!(!has_spare());
    }
}
