/// User register state saved on entry to the kernel.
///
/// Only the registers the system call path reads or writes are modeled. The
/// call number arrives in `v0` and arguments in `a0`..`a3`; on return `v0`
/// holds the result or error number and `a3` is non-zero on error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrapFrame {
    pub v0: u32,
    pub v1: u32,
    pub a0: u32,
    pub a1: u32,
    pub a2: u32,
    pub a3: u32,
    pub sp: u32,
    /// Address of the instruction that trapped.
    pub epc: u32,
}

/// Size of one instruction; `epc` advances by this after a system call.
pub const INSTRUCTION_SIZE: u32 = 4;

impl TrapFrame {
    /// Builds the initial frame for entering a fresh program.
    pub const fn for_entry(argc: u32, argv: u32, stackptr: u32, entrypoint: u32) -> Self {
        Self {
            v0: 0,
            v1: 0,
            a0: argc,
            a1: argv,
            a2: 0,
            a3: 0,
            sp: stackptr,
            epc: entrypoint,
        }
    }

    /// The frame a forked child resumes with: a zero return value, no error,
    /// and the instruction after the `fork` call.
    pub const fn fork_child(&self) -> Self {
        Self {
            v0: 0,
            a3: 0,
            epc: self.epc + INSTRUCTION_SIZE,
            ..*self
        }
    }

    /// Returns true if the last system call reported an error.
    pub const fn is_error(&self) -> bool {
        self.a3 != 0
    }
}
