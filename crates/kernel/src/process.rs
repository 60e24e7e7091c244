//! The process table.
//!
//! Processes are single-threaded, so a process is its kernel [`Thread`] plus a
//! slot in a fixed-size table indexed by `pid - 1`. The slot remembers the
//! parent, the exit code and an exit signal the parent blocks on in
//! `waitpid`.

use core::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use log::{debug, trace};
use synch::{Lock, Semaphore};

use crate::{Errno, Thread};

/// Process identifier. Valid pids are `1..=MAX_NUM_PROCS`.
pub type Pid = i32;

/// Parent pid recorded for processes started by the kernel itself.
pub const KERNEL_PID: Pid = 0;

/// Capacity of the process table.
pub const MAX_NUM_PROCS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Never claimed.
    Unused,
    Live,
    Exited(i32),
}

/// Hand-off between an exiting process and its waiting parent.
///
/// Each claim of a slot gets a fresh signal, so a waiter never observes a
/// later occupant of the same pid.
struct ExitSignal {
    sem: Semaphore,
    code: AtomicI32,
}

impl ExitSignal {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sem: Semaphore::new("exit_sem", 0),
            code: AtomicI32::new(-1),
        })
    }
}

struct Slot {
    parent: Pid,
    thread: Option<Arc<Thread>>,
    state: SlotState,
    exit: Arc<ExitSignal>,
}

impl Slot {
    fn unused() -> Self {
        Self {
            parent: KERNEL_PID,
            thread: None,
            state: SlotState::Unused,
            exit: ExitSignal::new(),
        }
    }
}

fn index_of(pid: Pid) -> Option<usize> {
    let index = usize::try_from(pid).ok()?.checked_sub(1)?;
    (index < MAX_NUM_PROCS).then_some(index)
}

pub struct ProcessTable {
    slots: Lock<[Slot; MAX_NUM_PROCS]>,
}

impl ProcessTable {
    /// Creates the table with every slot unused.
    pub fn bootstrap() -> Self {
        Self {
            slots: Lock::new("parray_lock", core::array::from_fn(|_| Slot::unused())),
        }
    }

    /// Claims the lowest slot not held by a live process.
    ///
    /// # Panics
    ///
    /// Panics if every slot is live; the table size is a hard kernel limit.
    pub fn assign_pid(&self, parent: Pid) -> Pid {
        let mut slots = self.slots.acquire();
        Self::claim(&mut slots, parent)
    }

    fn claim(slots: &mut [Slot; MAX_NUM_PROCS], parent: Pid) -> Pid {
        let Some(index) = slots.iter().position(|s| s.state != SlotState::Live) else {
            panic!("process table full: all {MAX_NUM_PROCS} pids in use");
        };
        let slot = &mut slots[index];
        slot.parent = parent;
        slot.thread = None;
        slot.state = SlotState::Live;
        slot.exit = ExitSignal::new();

        let pid = index as Pid + 1;
        trace!("pid {pid} assigned, parent {parent}");
        pid
    }

    /// Creates a process for a new kernel thread named `name`, child of
    /// `parent`.
    pub fn create(&self, parent: Pid, name: &str) -> Arc<Thread> {
        let mut slots = self.slots.acquire();
        let pid = Self::claim(&mut slots, parent);
        let thread = Arc::new(Thread::new(name, pid));
        slots[pid as usize - 1].thread = Some(Arc::clone(&thread));
        debug!("process {pid} ({name}) created by {parent}");
        thread
    }

    /// Records `code` as the exit status of `pid` and wakes its parent.
    ///
    /// # Panics
    ///
    /// Panics if `pid` is not a live process.
    pub fn exit(&self, pid: Pid, code: i32) {
        let signal = {
            let mut slots = self.slots.acquire();
            let slot = match index_of(pid) {
                Some(i) if slots[i].state == SlotState::Live => &mut slots[i],
                _ => panic!("exit of pid {pid}, which is not running"),
            };
            slot.state = SlotState::Exited(code);
            slot.thread = None;
            slot.exit.code.store(code, Ordering::Release);
            Arc::clone(&slot.exit)
        };

        debug!("process {pid} exited with {code}");
        signal.sem.V();
    }

    /// Releases a slot whose process never got to run.
    pub fn abandon(&self, pid: Pid) {
        let mut slots = self.slots.acquire();
        if let Some(index) = index_of(pid) {
            let slot = &mut slots[index];
            assert_eq!(slot.state, SlotState::Live, "abandoning pid {pid}");
            *slot = Slot::unused();
        }
    }

    /// Waits for `pid` to exit and stores its exit code in `status`.
    ///
    /// A process that has already exited is reported immediately, whoever asks.
    /// Otherwise only the parent may wait.
    pub fn waitpid(
        &self,
        caller: Pid,
        pid: Pid,
        status: Option<&mut i32>,
        options: i32,
    ) -> Result<Pid, Errno> {
        if options != 0 {
            return Err(Errno::EINVAL);
        }
        let Some(status) = status else {
            return Err(Errno::EFAULT);
        };
        let index = index_of(pid).ok_or(Errno::ESRCH)?;

        let signal = {
            let slots = self.slots.acquire();
            let slot = &slots[index];
            match slot.state {
                SlotState::Unused => return Err(Errno::ESRCH),
                SlotState::Exited(code) => {
                    *status = code;
                    return Ok(pid);
                }
                SlotState::Live if slot.parent != caller => {
                    debug!("waitpid: {caller} is not the parent of {pid}");
                    return Err(Errno::EINVAL);
                }
                SlotState::Live => Arc::clone(&slot.exit),
            }
        };

        trace!("{caller} waiting for {pid}");
        signal.sem.P();
        // Pass the wakeup on to any other thread of the parent waiting here.
        signal.sem.V();
        *status = signal.code.load(Ordering::Acquire);
        Ok(pid)
    }

    pub fn state(&self, pid: Pid) -> Option<SlotState> {
        index_of(pid).map(|i| self.slots.acquire()[i].state)
    }

    pub fn parent_of(&self, pid: Pid) -> Option<Pid> {
        let index = index_of(pid)?;
        let slots = self.slots.acquire();
        (slots[index].state != SlotState::Unused).then_some(slots[index].parent)
    }

    pub fn thread_of(&self, pid: Pid) -> Option<Arc<Thread>> {
        index_of(pid).and_then(|i| self.slots.acquire()[i].thread.clone())
    }

    /// Number of live processes.
    pub fn live_count(&self) -> usize {
        self.slots
            .acquire()
            .iter()
            .filter(|s| s.state == SlotState::Live)
            .count()
    }
}

impl fmt::Debug for ProcessTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.slots.acquire();
        f.debug_map()
            .entries(
                slots
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.state != SlotState::Unused)
                    .map(|(i, s)| (i + 1, (s.parent, s.state))),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn pids_start_at_one_and_fill_lowest_first() {
        let table = ProcessTable::bootstrap();
        assert_eq!(table.assign_pid(KERNEL_PID), 1);
        assert_eq!(table.assign_pid(KERNEL_PID), 2);
        table.exit(1, 0);
        assert_eq!(table.assign_pid(KERNEL_PID), 1);
        assert_eq!(table.assign_pid(KERNEL_PID), 3);
    }

    #[test]
    #[should_panic(expected = "process table full")]
    fn exhausting_the_table_is_fatal() {
        let table = ProcessTable::bootstrap();
        for _ in 0..MAX_NUM_PROCS {
            table.assign_pid(KERNEL_PID);
        }
        table.assign_pid(KERNEL_PID);
    }

    #[test]
    fn create_records_parent_and_thread() {
        let table = ProcessTable::bootstrap();
        let parent = table.assign_pid(KERNEL_PID);
        let child = table.create(parent, "child");
        assert_eq!(child.pid(), 2);
        assert_eq!(table.parent_of(2), Some(parent));
        assert!(Arc::ptr_eq(&table.thread_of(2).unwrap(), &child));

        table.exit(2, 5);
        assert!(table.thread_of(2).is_none());
        assert_eq!(table.state(2), Some(SlotState::Exited(5)));
    }

    #[test]
    fn waitpid_argument_checks() {
        let table = ProcessTable::bootstrap();
        let pid = table.assign_pid(KERNEL_PID);
        let mut status = 0;
        assert_eq!(
            table.waitpid(KERNEL_PID, pid, Some(&mut status), 1),
            Err(Errno::EINVAL)
        );
        assert_eq!(table.waitpid(KERNEL_PID, pid, None, 0), Err(Errno::EFAULT));
        assert_eq!(
            table.waitpid(KERNEL_PID, 7, Some(&mut status), 0),
            Err(Errno::ESRCH)
        );
        assert_eq!(
            table.waitpid(KERNEL_PID, -3, Some(&mut status), 0),
            Err(Errno::ESRCH)
        );
        assert_eq!(
            table.waitpid(KERNEL_PID, 99, Some(&mut status), 0),
            Err(Errno::ESRCH)
        );
    }

    #[test]
    fn waitpid_on_exited_process_does_not_block() {
        let table = ProcessTable::bootstrap();
        let parent = table.assign_pid(KERNEL_PID);
        let child = table.assign_pid(parent);
        table.exit(child, 7);

        let mut status = 0;
        // Any caller may collect an exit code that is already there.
        assert_eq!(table.waitpid(42, child, Some(&mut status), 0), Ok(child));
        assert_eq!(status, 7);
    }

    #[test]
    fn waitpid_by_non_parent_is_invalid() {
        let table = ProcessTable::bootstrap();
        let parent = table.assign_pid(KERNEL_PID);
        let child = table.assign_pid(parent);
        let mut status = 0;
        assert_eq!(
            table.waitpid(KERNEL_PID, child, Some(&mut status), 0),
            Err(Errno::EINVAL)
        );
    }

    #[test]
    fn waitpid_blocks_until_exit() {
        let table = Arc::new(ProcessTable::bootstrap());
        let parent = table.assign_pid(KERNEL_PID);
        let child = table.assign_pid(parent);

        let waiter = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                let mut status = 0;
                let pid = table.waitpid(parent, child, Some(&mut status), 0);
                (pid, status)
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        table.exit(child, 42);
        assert_eq!(waiter.join().unwrap(), (Ok(child), 42));
    }

    #[test]
    fn concurrent_waiters_all_see_the_exit() {
        let table = Arc::new(ProcessTable::bootstrap());
        let parent = table.assign_pid(KERNEL_PID);
        let child = table.assign_pid(parent);

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    let mut status = 0;
                    let pid = table.waitpid(parent, child, Some(&mut status), 0);
                    (pid, status)
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        table.exit(child, 9);
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), (Ok(child), 9));
        }
    }

    #[test]
    fn reused_pid_gets_a_fresh_exit_signal() {
        let table = ProcessTable::bootstrap();
        let parent = table.assign_pid(KERNEL_PID);
        let child = table.assign_pid(parent);
        table.exit(child, 1);

        let reused = table.assign_pid(parent);
        assert_eq!(reused, child);
        assert_eq!(table.state(reused), Some(SlotState::Live));

        let slots = table.slots.acquire();
        let signal = &slots[reused as usize - 1].exit;
        assert_eq!(signal.sem.count(), 0);
        assert_eq!(signal.code.load(Ordering::Acquire), -1);
    }

    #[test]
    #[should_panic(expected = "not running")]
    fn exit_of_unknown_pid_panics() {
        ProcessTable::bootstrap().exit(3, 0);
    }
}
