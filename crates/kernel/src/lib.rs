//! # Cinder kernel core
//!
//! Processes, kernel threads and system calls of the Cinder teaching kernel,
//! running on the simulated machine from the [`vm`] crate. User programs are
//! host code driving the kernel through [`User`] system calls.

mod boot;
pub mod console;
mod errno;
mod process;
mod program;
pub mod syscall;
mod thread;
mod trapframe;
mod user;

pub use boot::{Kernel, KernelConfig};
pub use errno::Errno;
pub use process::{KERNEL_PID, MAX_NUM_PROCS, Pid, ProcessTable, SlotState};
pub use program::{ProgramImage, Segment};
pub use thread::{Thread, current_pid, curthread, thread_exit, thread_fork};
pub use trapframe::{INSTRUCTION_SIZE, TrapFrame};
pub use user::{User, UserMode, WORD_SIZE};
