//! Wait channels: the sleep/wakeup queue behind every blocking primitive.
//!
//! A thread going to sleep first enqueues itself while still inside the
//! primitive's critical section, then leaves the critical section and blocks.
//! A waker must enter the same critical section to dequeue it, so a wakeup can
//! never slip in between "checked the condition" and "went to sleep".

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Thread};

use log::trace;
use spin::{Mutex, MutexGuard};

/// A thread parked on a [`WaitChannel`].
pub struct Sleeper {
    thread: Thread,
    woken: AtomicBool,
}

impl Sleeper {
    /// Deschedules the calling thread until this sleeper is woken.
    ///
    /// Spurious returns from the host's parking are absorbed here.
    pub fn block(&self) {
        while !self.woken.load(Ordering::Acquire) {
            thread::park();
        }
    }

    fn wake(&self) {
        self.woken.store(true, Ordering::Release);
        self.thread.unpark();
    }
}

/// Queue of threads sleeping on some condition.
pub struct WaitChannel {
    name: &'static str,
    sleepers: Mutex<VecDeque<Arc<Sleeper>>>,
}

impl WaitChannel {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            sleepers: Mutex::new(VecDeque::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Registers the calling thread as a sleeper without blocking yet.
    ///
    /// The caller must still be inside the critical section that protects the
    /// condition it is waiting on, and must call [`Sleeper::block`] after
    /// leaving it.
    pub fn enqueue(&self) -> Arc<Sleeper> {
        let sleeper = Arc::new(Sleeper {
            thread: thread::current(),
            woken: AtomicBool::new(false),
        });
        let mut sleepers = self.sleepers.lock();
        sleepers.push_back(Arc::clone(&sleeper));
        trace!("{}: {:?} sleeping, {} queued", self.name, thread::current().id(), sleepers.len());
        sleeper
    }

    /// Atomically releases `guard`, sleeps until woken, and relocks `mutex`.
    pub fn sleep<'a, T>(&self, guard: MutexGuard<'a, T>, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        let sleeper = self.enqueue();
        drop(guard);
        sleeper.block();
        mutex.lock()
    }

    /// Wakes the longest-sleeping thread. Returns false if nobody was asleep.
    pub fn wake_one(&self) -> bool {
        let next = self.sleepers.lock().pop_front();
        match next {
            Some(sleeper) => {
                sleeper.wake();
                true
            }
            None => false,
        }
    }

    /// Wakes every sleeping thread, returning how many were woken.
    pub fn wake_all(&self) -> usize {
        let sleepers: VecDeque<_> = core::mem::take(&mut *self.sleepers.lock());
        let count = sleepers.len();
        if count > 0 {
            trace!("{}: waking {count}", self.name);
        }
        for sleeper in sleepers {
            sleeper.wake();
        }
        count
    }

    pub fn has_sleepers(&self) -> bool {
        !self.sleepers.lock().is_empty()
    }

    pub fn sleeper_count(&self) -> usize {
        self.sleepers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn wake_without_sleepers_is_a_no_op() {
        let chan = WaitChannel::new("empty");
        assert!(!chan.wake_one());
        assert_eq!(chan.wake_all(), 0);
    }

    #[test]
    fn wakeup_before_block_is_not_lost() {
        let chan = WaitChannel::new("early");
        let sleeper = chan.enqueue();
        assert!(chan.wake_one());
        // Already woken; must return immediately.
        sleeper.block();
        assert!(!chan.has_sleepers());
    }

    #[test]
    fn wake_all_releases_every_sleeper() {
        let chan = Arc::new(WaitChannel::new("herd"));
        let state = Arc::new(Mutex::new(false));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let chan = Arc::clone(&chan);
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    let mut ready = state.lock();
                    while !*ready {
                        ready = chan.sleep(ready, &state);
                    }
                })
            })
            .collect();

        while chan.sleeper_count() < 4 {
            thread::sleep(Duration::from_millis(1));
        }

        *state.lock() = true;
        assert_eq!(chan.wake_all(), 4);

        for h in handles {
            h.join().unwrap();
        }
    }
}
