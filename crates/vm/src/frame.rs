use crate::{AddressSpaceId, VirtualAddress};

/// Lifecycle state of a physical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameState {
    /// Available for allocation.
    #[default]
    Free,
    /// Pinned for the kernel and never reclaimed.
    Fixed,
    /// Allocated and possibly modified.
    Dirty,
    /// Allocated and identical to its backing copy.
    Clean,
}

impl FrameState {
    pub const fn is_free(self) -> bool {
        matches!(self, Self::Free)
    }
}

/// Holds metadata for one physical frame tracked by the coremap.
///
/// `run_length` is only meaningful on the first frame of an allocated run and
/// is zero everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    /// Address space the frame was allocated for, or `None` for kernel memory.
    pub owner: Option<AddressSpaceId>,
    /// Kernel alias of the frame.
    pub vaddr: VirtualAddress,
    /// Number of frames in the run this frame starts.
    pub run_length: usize,
    pub state: FrameState,
}

impl FrameDescriptor {
    pub const fn free(vaddr: VirtualAddress) -> Self {
        Self {
            owner: None,
            vaddr,
            run_length: 0,
            state: FrameState::Free,
        }
    }

    /// Returns true if this frame is the first frame of an allocated run.
    pub const fn starts_run(&self) -> bool {
        self.run_length > 0 && !self.state.is_free()
    }
}
