use core::{
    cell::UnsafeCell,
    hint::spin_loop,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{SplGuard, ThreadId};

/// Sentinel holder value meaning "nobody".
const UNHELD: u64 = 0;

/// A busy-waiting lock for critical sections that must not sleep.
///
/// Acquiring raises the interrupt priority level for as long as the guard
/// lives, so any attempt to block while holding a spinlock trips the
/// blocking primitives' assertions.
pub struct Spinlock<T: ?Sized> {
    name: &'static str,
    /// Raw [`ThreadId`] of the holder, or [`UNHELD`].
    holder: AtomicU64,
    inner: UnsafeCell<T>,
}

// Safety: mutual exclusion; only T: Send may cross threads.
unsafe impl<T: ?Sized + Send> Sync for Spinlock<T> {}
unsafe impl<T: ?Sized + Send> Send for Spinlock<T> {}

impl<T> Spinlock<T> {
    pub const fn new(name: &'static str, inner: T) -> Self {
        Self {
            name,
            holder: AtomicU64::new(UNHELD),
            inner: UnsafeCell::new(inner),
        }
    }
}

impl<T: ?Sized> Spinlock<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Spin until acquired (TATAS), then return a guard.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds this spinlock.
    #[inline]
    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        let me = ThreadId::current().as_u64();
        assert_ne!(
            self.holder.load(Ordering::Relaxed),
            me,
            "spinlock {} acquired twice by the same thread",
            self.name
        );

        let spl = SplGuard::raise();
        while self
            .holder
            .compare_exchange_weak(UNHELD, me, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // Contended path: spin on a read, then retry CAS.
            while self.holder.load(Ordering::Relaxed) != UNHELD {
                spin_loop();
            }
        }

        SpinlockGuard { lock: self, _spl: spl }
    }

    /// Try once; returns immediately.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        let me = ThreadId::current().as_u64();
        let spl = SplGuard::raise();
        if self
            .holder
            .compare_exchange(UNHELD, me, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(SpinlockGuard { lock: self, _spl: spl })
        } else {
            None
        }
    }

    /// Closure convenience, built on the guard.
    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut g = self.lock();
        f(&mut g)
    }

    /// Returns true if the calling thread is the current holder.
    pub fn do_i_hold(&self) -> bool {
        self.holder.load(Ordering::Relaxed) == ThreadId::current().as_u64()
    }

    /// Mutable access when you have `&mut self` (no contention possible).
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

impl<T: ?Sized> Drop for Spinlock<T> {
    fn drop(&mut self) {
        debug_assert_eq!(
            *self.holder.get_mut(),
            UNHELD,
            "spinlock {} destroyed while held",
            self.name
        );
    }
}

pub struct SpinlockGuard<'a, T: ?Sized> {
    lock: &'a Spinlock<T>,
    // Dropped after the holder is cleared in `Drop::drop`.
    _spl: SplGuard,
}

impl<T: ?Sized> Deref for SpinlockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.inner.get() }
    }
}

impl<T: ?Sized> Drop for SpinlockGuard<'_, T> {
    fn drop(&mut self) {
        let me = ThreadId::current().as_u64();
        let previous = self.lock.holder.swap(UNHELD, Ordering::Release);
        assert_eq!(
            previous, me,
            "spinlock {} released by a thread that does not hold it",
            self.lock.name
        );
    }
}
