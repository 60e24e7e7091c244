use crate::{LockGuard, WaitChannel};

/// Condition variable with monitor semantics, always used together with a
/// [`Lock`](crate::Lock) the caller holds.
///
/// Pairing a `Cv` with the same lock across `wait` and `signal` is the
/// caller's responsibility.
pub struct Cv {
    name: &'static str,
    wchan: WaitChannel,
}

impl Cv {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            wchan: WaitChannel::new(name),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Atomically releases the lock behind `guard` and sleeps until signaled,
    /// then reacquires the lock before returning.
    ///
    /// Wakeups are not tied to any condition: re-check it in a loop.
    pub fn wait<'a, T: ?Sized>(&self, guard: LockGuard<'a, T>) -> LockGuard<'a, T> {
        let lock = guard.lock();
        assert!(
            lock.do_i_hold(),
            "cv {} waited on without holding {}",
            self.name,
            lock.name()
        );

        // Queue up before the lock is released so a signal issued right after
        // the release still finds us.
        let sleeper = self.wchan.enqueue();
        drop(guard);
        sleeper.block();
        lock.acquire()
    }

    /// Wakes exactly one waiter, if any.
    pub fn signal<T: ?Sized>(&self, guard: &LockGuard<'_, T>) {
        self.assert_holds(guard);
        self.wchan.wake_one();
    }

    /// Wakes every waiter.
    pub fn broadcast<T: ?Sized>(&self, guard: &LockGuard<'_, T>) {
        self.assert_holds(guard);
        self.wchan.wake_all();
    }

    pub fn has_waiters(&self) -> bool {
        self.wchan.has_sleepers()
    }

    fn assert_holds<T: ?Sized>(&self, guard: &LockGuard<'_, T>) {
        assert!(
            guard.lock().do_i_hold(),
            "cv {} signaled without holding {}",
            self.name,
            guard.lock().name()
        );
    }
}

impl Drop for Cv {
    fn drop(&mut self) {
        debug_assert!(
            !self.wchan.has_sleepers(),
            "cv {} destroyed with waiters",
            self.name
        );
    }
}
