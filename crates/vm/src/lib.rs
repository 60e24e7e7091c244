//! # Cinder Virtual Memory (VM)
//!
//! Memory management for the Cinder teaching kernel on a simulated 32-bit machine:
//!
//! - A software [`Machine`] providing physical RAM, a software-refilled TLB and the raw
//!   boot-time primitives (`ram_getsize`, `ram_stealmem`).
//! - The [`Coremap`], a physical frame allocator tracking every frame's state and owner,
//!   with a bump-allocating bootstrap phase before it is initialized.
//! - Per-process [`AddressSpace`]s: two static regions, a stack, a growable heap and the
//!   page table describing them, including eager duplication for `fork`.

mod address;
mod address_space;
mod coremap;
mod error;
mod frame;
mod human_size;
mod machine;
mod numbers;
mod page_table;

pub use address::{PhysicalAddress, VirtualAddress};
pub use address_space::{
    AddressSpace, AddressSpaceId, HEAPPAGES, Region, USERSTACK, VM_STACKPAGES,
};
pub use coremap::{Coremap, FRAME_DESCRIPTOR_SIZE};
pub use error::VmError;
pub use frame::{FrameDescriptor, FrameState};
pub use human_size::HumanSize;
pub use machine::{
    MIPS_KSEG0, Machine, NUM_TLB, PAGE_FRAME, PAGE_SIZE, TLBLO_INVALID, TlbEntry, tlbhi_invalid,
};
pub use numbers::{FrameNumber, PageNumber};
pub use page_table::{PageFlags, PageTable, PageTableEntry};
