//! Kernel threads.
//!
//! Every kernel thread runs on its own host thread and belongs to exactly one
//! process. A thread ends by unwinding out of its entry point through
//! [`thread_exit`]; the start routine catches the unwind, tears down the
//! address space and reports the exit code to the process table.

use core::cell::RefCell;
use core::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{error, trace, warn};
use spin::Mutex;
use vm::AddressSpace;

use crate::{Errno, KERNEL_PID, Kernel, Pid, UserMode};

pub struct Thread {
    name: String,
    pid: Pid,
    vmspace: Mutex<Option<AddressSpace>>,
    program: Mutex<Option<Arc<dyn UserMode>>>,
}

impl Thread {
    pub(crate) fn new(name: &str, pid: Pid) -> Self {
        Self {
            name: name.to_owned(),
            pid,
            vmspace: Mutex::new(None),
            program: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Installs `aspace` as this thread's address space, returning the previous one.
    pub fn install_vmspace(&self, aspace: AddressSpace) -> Option<AddressSpace> {
        self.vmspace.lock().replace(aspace)
    }

    pub fn take_vmspace(&self) -> Option<AddressSpace> {
        self.vmspace.lock().take()
    }

    /// Runs `f` on the thread's address space, if it has one.
    pub fn with_vmspace<R>(&self, f: impl FnOnce(&mut AddressSpace) -> R) -> Option<R> {
        self.vmspace.lock().as_mut().map(f)
    }

    pub(crate) fn set_program(&self, program: Arc<dyn UserMode>) {
        *self.program.lock() = Some(program);
    }

    pub(crate) fn program(&self) -> Option<Arc<dyn UserMode>> {
        self.program.lock().clone()
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("name", &self.name)
            .field("pid", &self.pid)
            .field("vmspace", &*self.vmspace.lock())
            .finish_non_exhaustive()
    }
}

thread_local! {
    static CURTHREAD: RefCell<Option<Arc<Thread>>> = const { RefCell::new(None) };
}

/// The kernel thread running on the calling host thread, if any.
pub fn curthread() -> Option<Arc<Thread>> {
    CURTHREAD.with(|cur| cur.borrow().clone())
}

/// The pid of the calling process, or [`KERNEL_PID`] outside of any process.
pub fn current_pid() -> Pid {
    CURTHREAD.with(|cur| cur.borrow().as_ref().map_or(KERNEL_PID, |t| t.pid()))
}

/// Unwind payload carrying a thread's exit code.
struct ThreadExit(i32);

/// Ends the calling kernel thread, reporting `code` as its process's exit status.
pub fn thread_exit(code: i32) -> ! {
    panic::resume_unwind(Box::new(ThreadExit(code)))
}

/// Creates a process with a new kernel thread running `entry`.
///
/// The new process is a child of the caller. Returns the new pid, or
/// `ENOMEM` if the host thread cannot be created.
pub fn thread_fork<F>(kernel: &Arc<Kernel>, name: &str, entry: F) -> Result<Pid, Errno>
where
    F: FnOnce(&Arc<Kernel>) + Send + 'static,
{
    let thread = kernel.processes().create(current_pid(), name);
    let pid = thread.pid();

    let spawned = std::thread::Builder::new()
        .name(format!("{name}[{pid}]"))
        .spawn({
            let kernel = Arc::clone(kernel);
            let thread = Arc::clone(&thread);
            move || thread_start(kernel, thread, entry)
        });

    match spawned {
        Ok(_) => Ok(pid),
        Err(err) => {
            warn!("thread_fork: cannot start {name}: {err}");
            kernel.processes().abandon(pid);
            Err(Errno::ENOMEM)
        }
    }
}

fn thread_start<F>(kernel: Arc<Kernel>, thread: Arc<Thread>, entry: F)
where
    F: FnOnce(&Arc<Kernel>),
{
    CURTHREAD.with(|cur| *cur.borrow_mut() = Some(Arc::clone(&thread)));
    trace!("thread {} (pid {}) started", thread.name(), thread.pid());

    let result = panic::catch_unwind(AssertUnwindSafe(|| entry(&kernel)));
    let code = match result {
        Ok(()) => 0,
        Err(payload) => match payload.downcast::<ThreadExit>() {
            Ok(exit) => exit.0,
            Err(payload) => {
                error!("thread {} (pid {}) panicked", thread.name(), thread.pid());
                thread_finish(&kernel, &thread, -1);
                panic::resume_unwind(payload);
            }
        },
    };
    thread_finish(&kernel, &thread, code);
}

fn thread_finish(kernel: &Kernel, thread: &Thread, code: i32) {
    if let Some(aspace) = thread.take_vmspace() {
        aspace.destroy();
    }
    thread.program.lock().take();
    CURTHREAD.with(|cur| cur.borrow_mut().take());
    kernel.processes().exit(thread.pid(), code);
}
