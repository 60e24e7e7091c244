/// Recoverable failures of the memory subsystem.
///
/// Invariant violations (double release, overlapping runs, loading twice) are
/// not represented here; they panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    /// No run of free frames large enough, or the heap budget is exhausted.
    #[error("out of memory")]
    OutOfMemory,
    /// The request is malformed, e.g. the heap would run into the stack.
    #[error("invalid argument")]
    InvalidArgument,
    /// An address space may only have two static regions.
    #[error("more than two static regions are not supported")]
    Unimplemented,
    /// A user address is not backed by any region.
    #[error("bad user address")]
    BadAddress,
}
