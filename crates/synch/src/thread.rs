//! Identity of the executing thread.
//!
//! Holder tracking in [`Lock`](crate::Lock) and [`Spinlock`](crate::Spinlock)
//! compares identities, so every thread that touches a primitive is lazily given
//! a unique, never-reused, non-zero id.

use core::fmt;
use core::num::NonZeroU64;
use core::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: ThreadId = ThreadId::allocate();
}

/// Opaque identity of a schedulable unit.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ThreadId(NonZeroU64);

impl ThreadId {
    fn allocate() -> Self {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        match NonZeroU64::new(id) {
            Some(id) => Self(id),
            None => panic!("thread id space exhausted"),
        }
    }

    /// Returns the identity of the calling thread.
    pub fn current() -> Self {
        CURRENT.with(|id| *id)
    }

    /// Returns the raw id. Never zero.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({})", self.0)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn stable_within_a_thread() {
        assert_eq!(ThreadId::current(), ThreadId::current());
    }

    #[test]
    fn distinct_across_threads() {
        let here = ThreadId::current();
        let there = thread::spawn(ThreadId::current).join().unwrap();
        assert_ne!(here, there);
        assert_ne!(there.as_u64(), 0);
    }
}
