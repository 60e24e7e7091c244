//! User mode.
//!
//! A user program is host code implementing [`UserMode`]. It runs on its
//! process's kernel thread and talks to the kernel only through system calls
//! and its own address space, via the [`User`] handle. Like a real program it
//! is resumed from a trapframe: at its entry point when started, and at the
//! instruction after `fork` in a new child.

use std::sync::Arc;

use log::trace;
use vm::VirtualAddress;

use crate::{
    Errno, Kernel, Pid, TrapFrame,
    syscall::{SYS_EXIT, SYS_FORK, SYS_GETPID, SYS_SBRK, SYS_WAITPID},
    thread::curthread,
};

/// Size of a user machine word.
pub const WORD_SIZE: usize = 4;

/// Longest argument string `User::args` will read.
const ARG_MAX: usize = 1024;

/// Code that runs in user mode.
pub trait UserMode: Send + Sync {
    /// Runs until the program exits. Returning counts as `_exit(0)`.
    fn run(&self, user: &mut User);
}

impl<F> UserMode for F
where
    F: Fn(&mut User) + Send + Sync,
{
    fn run(&self, user: &mut User) {
        self(user)
    }
}

/// The user-mode view of a running process.
pub struct User {
    kernel: Arc<Kernel>,
    tf: TrapFrame,
    argc: u32,
    argv: u32,
}

impl User {
    /// Address of the next user instruction.
    pub fn pc(&self) -> u32 {
        self.tf.epc
    }

    pub fn trapframe(&self) -> &TrapFrame {
        &self.tf
    }

    /// Issues system call `callno` with up to three arguments.
    ///
    /// Returns `v0` on success and the decoded error number otherwise.
    pub fn syscall(&mut self, callno: u32, a0: u32, a1: u32, a2: u32) -> Result<u32, Errno> {
        self.tf.v0 = callno;
        self.tf.a0 = a0;
        self.tf.a1 = a1;
        self.tf.a2 = a2;
        self.kernel.syscall(&mut self.tf);
        if self.tf.is_error() {
            Err(Errno::from_code(self.tf.v0).unwrap_or(Errno::ENOSYS))
        } else {
            Ok(self.tf.v0)
        }
    }

    /// Returns the child's pid. The child starts over in [`UserMode::run`]
    /// with `pc` just past this call.
    pub fn fork(&mut self) -> Result<Pid, Errno> {
        self.syscall(SYS_FORK, 0, 0, 0).map(|pid| pid as Pid)
    }

    pub fn exit(&mut self, code: i32) -> ! {
        let _ = self.syscall(SYS_EXIT, code as u32, 0, 0);
        unreachable!("_exit returned");
    }

    /// Waits for `pid`, storing its exit status at user address `status`.
    pub fn waitpid(
        &mut self,
        pid: Pid,
        status: VirtualAddress,
        options: i32,
    ) -> Result<Pid, Errno> {
        self.syscall(SYS_WAITPID, pid as u32, status.as_u32(), options as u32)
            .map(|pid| pid as Pid)
    }

    pub fn getpid(&mut self) -> Pid {
        self.syscall(SYS_GETPID, 0, 0, 0).map_or(-1, |pid| pid as Pid)
    }

    /// Grows the heap by `amount` bytes and returns the old break.
    pub fn sbrk(&mut self, amount: i32) -> Result<VirtualAddress, Errno> {
        self.syscall(SYS_SBRK, amount as u32, 0, 0)
            .map(VirtualAddress::new)
    }

    /// Writes `data` to this process's memory.
    pub fn copyout(&self, vaddr: VirtualAddress, data: &[u8]) -> Result<(), Errno> {
        with_current_vmspace(|aspace| aspace.copyout(vaddr, data))
    }

    /// Reads this process's memory into `buf`.
    pub fn copyin(&self, vaddr: VirtualAddress, buf: &mut [u8]) -> Result<(), Errno> {
        with_current_vmspace(|aspace| aspace.copyin(vaddr, buf))
    }

    pub fn load_word(&self, vaddr: VirtualAddress) -> Result<u32, Errno> {
        let mut word = [0u8; WORD_SIZE];
        self.copyin(vaddr, &mut word)?;
        Ok(u32::from_be_bytes(word))
    }

    pub fn store_word(&self, vaddr: VirtualAddress, value: u32) -> Result<(), Errno> {
        self.copyout(vaddr, &value.to_be_bytes())
    }

    /// Reads the program arguments from the user stack.
    pub fn args(&self) -> Result<Vec<String>, Errno> {
        let argv = VirtualAddress::new(self.argv);
        (0..self.argc as usize)
            .map(|i| {
                let ptr = self.load_word(argv + i * WORD_SIZE)?;
                self.load_str(VirtualAddress::new(ptr))
            })
            .collect()
    }

    fn load_str(&self, vaddr: VirtualAddress) -> Result<String, Errno> {
        let mut bytes = Vec::new();
        let mut byte = [0u8];
        loop {
            if bytes.len() == ARG_MAX {
                return Err(Errno::EFAULT);
            }
            self.copyin(vaddr + bytes.len(), &mut byte)?;
            if byte[0] == 0 {
                break;
            }
            bytes.push(byte[0]);
        }
        String::from_utf8(bytes).map_err(|_| Errno::EINVAL)
    }
}

fn with_current_vmspace<R>(
    f: impl FnOnce(&mut vm::AddressSpace) -> Result<R, vm::VmError>,
) -> Result<R, Errno> {
    let thread = curthread().ok_or(Errno::EFAULT)?;
    thread
        .with_vmspace(|aspace| f(aspace).map_err(Errno::from))
        .unwrap_or(Err(Errno::EFAULT))
}

/// Enters user mode in the current process with register state `tf`.
///
/// Never returns: the program either exits or falls off its end.
pub(crate) fn usermode(kernel: &Arc<Kernel>, program: Arc<dyn UserMode>, tf: TrapFrame) -> ! {
    trace!("usermode: pc {:#010x} sp {:#010x}", tf.epc, tf.sp);
    let mut user = User {
        kernel: Arc::clone(kernel),
        tf,
        argc: tf.a0,
        argv: tf.a1,
    };
    program.run(&mut user);
    user.exit(0)
}
