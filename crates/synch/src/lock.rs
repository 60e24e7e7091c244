use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

use spin::Mutex;

use crate::{ThreadId, WaitChannel, spl};

/// Sleeping mutual-exclusion lock with an explicitly tracked holder.
///
/// Unlike a spinlock, a contended [`Lock::acquire`] deschedules the caller.
/// The holder's [`ThreadId`] is recorded so that acquiring a lock you already
/// hold, or releasing one you do not, is caught immediately.
///
/// The lock owns the data it protects; the returned [`LockGuard`] is the only
/// way to reach it and releases the lock when dropped.
pub struct Lock<T: ?Sized = ()> {
    name: &'static str,
    holder: Mutex<Option<ThreadId>>,
    wchan: WaitChannel,
    data: UnsafeCell<T>,
}

// Safety: access to `data` is serialized by the holder protocol.
unsafe impl<T: ?Sized + Send> Sync for Lock<T> {}
unsafe impl<T: ?Sized + Send> Send for Lock<T> {}

impl<T> Lock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            holder: Mutex::new(None),
            wchan: WaitChannel::new(name),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> Lock<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Blocks until the lock is free, then takes it.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds the lock, or if interrupts
    /// are disabled.
    pub fn acquire(&self) -> LockGuard<'_, T> {
        let me = ThreadId::current();
        assert!(
            spl::can_sleep(),
            "lock {} acquired with interrupts disabled",
            self.name
        );

        let mut holder = self.holder.lock();
        assert_ne!(
            *holder,
            Some(me),
            "lock {} acquired twice by the same thread",
            self.name
        );
        while holder.is_some() {
            holder = self.wchan.sleep(holder, &self.holder);
        }
        *holder = Some(me);

        LockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Returns true if the calling thread holds this lock.
    pub fn do_i_hold(&self) -> bool {
        *self.holder.lock() == Some(ThreadId::current())
    }

    /// Returns true if any thread holds this lock.
    pub fn is_held(&self) -> bool {
        self.holder.lock().is_some()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn release(&self) {
        let mut holder = self.holder.lock();
        assert_eq!(
            *holder,
            Some(ThreadId::current()),
            "lock {} released by a thread that does not hold it",
            self.name
        );
        *holder = None;
        self.wchan.wake_one();
    }
}

impl<T: ?Sized> Drop for Lock<T> {
    fn drop(&mut self) {
        debug_assert!(
            self.holder.get_mut().is_none(),
            "lock {} destroyed while held",
            self.name
        );
        debug_assert!(
            !self.wchan.has_sleepers(),
            "lock {} destroyed with sleepers",
            self.name
        );
    }
}

/// Proof that the current thread holds a [`Lock`].
///
/// `!Send`: a lock must be released by the thread that acquired it.
pub struct LockGuard<'a, T: ?Sized> {
    lock: &'a Lock<T>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T: ?Sized> LockGuard<'a, T> {
    /// The lock this guard holds.
    pub fn lock(&self) -> &'a Lock<T> {
        self.lock
    }

    /// Releases the lock. Same as dropping the guard.
    pub fn release(self) {}
}

impl<T: ?Sized> Deref for LockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for LockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for LockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, mpsc};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn acquire_then_do_i_hold() {
        let lock = Lock::new("hold", 0u32);
        assert!(!lock.do_i_hold());

        let mut g = lock.acquire();
        *g += 1;
        assert!(lock.do_i_hold());

        g.release();
        assert!(!lock.do_i_hold());
        assert!(!lock.is_held());
    }

    #[test]
    fn other_threads_do_not_hold() {
        let lock = Arc::new(Lock::new("foreign", ()));
        let _g = lock.acquire();
        let other = Arc::clone(&lock);
        let held_there = thread::spawn(move || other.do_i_hold()).join().unwrap();
        assert!(!held_there);
    }

    #[test]
    fn second_acquirer_blocks_until_release() {
        let lock = Arc::new(Lock::new("contended", Vec::new()));
        let got_it = Arc::new(AtomicBool::new(false));

        let mut g = lock.acquire();
        g.push(1);

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let lock = Arc::clone(&lock);
            let got_it = Arc::clone(&got_it);
            thread::spawn(move || {
                tx.send(()).unwrap();
                let mut g = lock.acquire();
                got_it.store(true, Ordering::SeqCst);
                g.push(2);
            })
        };

        rx.recv().unwrap();
        while !lock.wchan.has_sleepers() {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!got_it.load(Ordering::SeqCst));

        drop(g);
        waiter.join().unwrap();
        assert!(got_it.load(Ordering::SeqCst));
        assert_eq!(*lock.acquire(), vec![1, 2]);
    }

    #[test]
    fn contended_increments_are_exclusive() {
        let lock = Arc::new(Lock::new("counter", 0usize));
        let in_cs = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let in_cs = Arc::clone(&in_cs);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let mut g = lock.acquire();
                        assert_eq!(in_cs.fetch_add(1, Ordering::SeqCst), 0);
                        *g += 1;
                        in_cs.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.acquire(), 3_000);
    }

    #[test]
    #[should_panic(expected = "acquired twice")]
    fn reentrant_acquire_is_fatal() {
        let lock = Lock::new("twice", ());
        let _g = lock.acquire();
        let _h = lock.acquire();
    }
}
