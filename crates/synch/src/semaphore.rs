use spin::Mutex;

use crate::{WaitChannel, spl};

/// Counting semaphore.
///
/// `P` blocks while the count is zero and then decrements it; `V` increments
/// the count and wakes one sleeper. The count can never go negative.
pub struct Semaphore {
    name: &'static str,
    count: Mutex<u32>,
    wchan: WaitChannel,
}

impl Semaphore {
    pub const fn new(name: &'static str, initial_count: u32) -> Self {
        Self {
            name,
            count: Mutex::new(initial_count),
            wchan: WaitChannel::new(name),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Decrements the count, sleeping until it is non-zero.
    ///
    /// # Panics
    ///
    /// Panics if called with interrupts disabled (for example while holding a
    /// [`Spinlock`](crate::Spinlock)), since the caller may have to sleep.
    #[allow(non_snake_case)]
    pub fn P(&self) {
        assert!(
            spl::can_sleep(),
            "P on semaphore {} with interrupts disabled",
            self.name
        );

        let mut count = self.count.lock();
        while *count == 0 {
            count = self.wchan.sleep(count, &self.count);
        }
        *count -= 1;
    }

    /// Increments the count and wakes one sleeper.
    #[allow(non_snake_case)]
    pub fn V(&self) {
        let mut count = self.count.lock();
        *count = match count.checked_add(1) {
            Some(next) => next,
            None => panic!("semaphore {} count overflow", self.name),
        };
        self.wchan.wake_one();
    }

    /// Decrements the count only if that can be done without sleeping.
    pub fn try_p(&self) -> bool {
        let mut count = self.count.lock();
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    /// Current count. Only a snapshot; may change as soon as it is read.
    pub fn count(&self) -> u32 {
        *self.count.lock()
    }

    pub fn has_sleepers(&self) -> bool {
        self.wchan.has_sleepers()
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        debug_assert!(
            !self.wchan.has_sleepers(),
            "semaphore {} destroyed with sleepers",
            self.name
        );
    }
}
