//! System calls.
//!
//! The call number arrives in `v0` and arguments in `a0`..`a2`. On return `v0`
//! holds the result with `a3 == 0`, or an [`Errno`] code with `a3 == 1`, and
//! `epc` points past the `syscall` instruction.

use std::sync::Arc;

use log::{debug, warn};
use synch::spl;
use vm::VirtualAddress;

use crate::{
    Errno, Kernel, Pid, TrapFrame,
    thread::{self, curthread},
    trapframe::INSTRUCTION_SIZE,
    user::{WORD_SIZE, usermode},
};

pub const SYS_FORK: u32 = 0;
pub const SYS_EXIT: u32 = 3;
pub const SYS_WAITPID: u32 = 4;
pub const SYS_GETPID: u32 = 5;
pub const SYS_SBRK: u32 = 13;

impl Kernel {
    /// Handles the system call described by `tf`, writing the outcome back
    /// into it.
    pub fn syscall(self: &Arc<Self>, tf: &mut TrapFrame) {
        assert_eq!(spl::curspl(), spl::SPL_LOW, "syscall entered at raised spl");

        let callno = tf.v0;
        let result = match callno {
            SYS_FORK => sys_fork(self, tf).map(|pid| pid as u32),
            SYS_EXIT => sys_exit(tf.a0 as i32),
            SYS_WAITPID => {
                let status = VirtualAddress::new(tf.a1);
                sys_waitpid(self, tf.a0 as Pid, status, tf.a2 as i32).map(|pid| pid as u32)
            }
            SYS_GETPID => Ok(sys_getpid() as u32),
            SYS_SBRK => sys_sbrk(tf.a0 as i32).map(|old| old.as_u32()),
            _ => {
                warn!("unknown syscall {callno}");
                Err(Errno::ENOSYS)
            }
        };

        match result {
            Ok(retval) => {
                tf.v0 = retval;
                tf.a3 = 0;
            }
            Err(err) => {
                tf.v0 = err.code();
                tf.a3 = 1;
            }
        }
        tf.epc += INSTRUCTION_SIZE;

        assert_eq!(spl::curspl(), spl::SPL_LOW, "syscall returned at raised spl");
    }
}

/// Duplicates the calling process. The child resumes from a copy of `tf`.
pub fn sys_fork(kernel: &Arc<Kernel>, tf: &TrapFrame) -> Result<Pid, Errno> {
    let parent = curthread().ok_or(Errno::EINVAL)?;
    let program = parent.program().ok_or(Errno::EINVAL)?;
    let child_vmspace = parent
        .with_vmspace(|aspace| aspace.copy())
        .ok_or(Errno::EINVAL)?
        .map_err(|err| {
            debug!("fork: address space copy failed: {err}");
            Errno::ENOMEM
        })?;

    let child_tf = *tf;
    let child = thread::thread_fork(kernel, parent.name(), move |kernel| {
        let tf = child_tf.fork_child();
        let Some(me) = curthread() else {
            unreachable!("forked child without a thread");
        };
        me.set_program(Arc::clone(&program));
        me.install_vmspace(child_vmspace);
        me.with_vmspace(|aspace| aspace.activate());
        usermode(kernel, program, tf)
    })?;

    debug!("process {} forked {child}", parent.pid());
    Ok(child)
}

/// Terminates the calling process with exit status `code`.
pub fn sys_exit(code: i32) -> ! {
    thread::thread_exit(code)
}

/// Waits for `pid` and stores its exit status at user address `status`.
pub fn sys_waitpid(
    kernel: &Kernel,
    pid: Pid,
    status: VirtualAddress,
    options: i32,
) -> Result<Pid, Errno> {
    let caller = curthread().ok_or(Errno::EINVAL)?;
    let status_ok = status.as_u32() != 0
        && caller
            .with_vmspace(|aspace| {
                aspace.translate(status).is_some()
                    && aspace.translate(status + (WORD_SIZE - 1)).is_some()
            })
            .unwrap_or(false);

    let mut code = 0;
    let status_slot = status_ok.then_some(&mut code);
    let pid = kernel
        .processes()
        .waitpid(caller.pid(), pid, status_slot, options)?;

    caller
        .with_vmspace(|aspace| aspace.copyout(status, &code.to_be_bytes()))
        .unwrap_or(Err(vm::VmError::BadAddress))?;
    Ok(pid)
}

pub fn sys_getpid() -> Pid {
    thread::current_pid()
}

/// Moves the calling process's heap break by `amount` bytes and returns the
/// old break.
pub fn sys_sbrk(amount: i32) -> Result<VirtualAddress, Errno> {
    let thread = curthread().ok_or(Errno::EINVAL)?;
    let old = thread
        .with_vmspace(|aspace| aspace.grow_heap(amount as isize))
        .ok_or(Errno::EINVAL)??;
    Ok(old)
}
