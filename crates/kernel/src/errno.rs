use vm::VmError;

/// Error numbers returned to user programs through the `v0`/`a3` contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[repr(u32)]
pub enum Errno {
    #[error("function not implemented")]
    ENOSYS = 1,
    #[error("unimplemented feature")]
    EUNIMP = 2,
    #[error("out of memory")]
    ENOMEM = 3,
    #[error("bad memory reference")]
    EFAULT = 6,
    #[error("invalid argument")]
    EINVAL = 8,
    #[error("no such process")]
    ESRCH = 15,
}

impl Errno {
    /// The numeric value placed in `v0`.
    pub const fn code(self) -> u32 {
        self as u32
    }

    pub const fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => Self::ENOSYS,
            2 => Self::EUNIMP,
            3 => Self::ENOMEM,
            6 => Self::EFAULT,
            8 => Self::EINVAL,
            15 => Self::ESRCH,
            _ => return None,
        })
    }
}

impl From<VmError> for Errno {
    fn from(err: VmError) -> Self {
        match err {
            VmError::OutOfMemory => Self::ENOMEM,
            VmError::InvalidArgument => Self::EINVAL,
            VmError::Unimplemented => Self::EUNIMP,
            VmError::BadAddress => Self::EFAULT,
        }
    }
}
