//! Software model of the machine the kernel runs on.
//!
//! The model is a small 32-bit MIPS-like system:
//! - Physical RAM starting at address zero, with the kernel image at the bottom.
//! - A direct-mapped kernel window (`kseg0`) at [`MIPS_KSEG0`].
//! - A software-refilled TLB of [`NUM_TLB`] entries.
//!
//! Before the coremap takes over, boot code carves memory out of RAM with
//! [`Machine::ram_stealmem`]. [`Machine::ram_getsize`] hands the remaining range
//! over and permanently ends the stealing phase.

use core::sync::atomic::{AtomicU32, Ordering};

use log::trace;
use spin::Mutex;

use crate::PhysicalAddress;

/// Page size in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Mask selecting the page-number bits of an address.
pub const PAGE_FRAME: u32 = !(PAGE_SIZE as u32 - 1);

/// Base of the direct-mapped kernel window.
pub const MIPS_KSEG0: u32 = 0x8000_0000;

/// Number of TLB entries.
pub const NUM_TLB: usize = 64;

/// Largest amount of RAM the direct-mapped window can reach.
const MAX_RAM: usize = 0x2000_0000;

/// Value of `ram_first_free` once the stealing phase is over.
const STEAL_CLOSED: u32 = u32::MAX;

/// The `entryhi` value used to invalidate TLB slot `index`.
///
/// Each slot gets a distinct kseg0 page so that no two invalid entries ever match
/// the same address.
#[inline]
pub const fn tlbhi_invalid(index: usize) -> u32 {
    (0x80000 + index as u32) << 12
}

/// The `entrylo` value of an invalid TLB entry.
pub const TLBLO_INVALID: u32 = 0;

/// A single TLB slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    pub entryhi: u32,
    pub entrylo: u32,
}

impl TlbEntry {
    const fn invalid(index: usize) -> Self {
        Self {
            entryhi: tlbhi_invalid(index),
            entrylo: TLBLO_INVALID,
        }
    }
}

/// Simulated physical memory and MMU.
pub struct Machine {
    ram: Mutex<Box<[u8]>>,
    /// Next physical address `ram_stealmem` will hand out.
    first_free: AtomicU32,
    last_paddr: u32,
    tlb: Mutex<[TlbEntry; NUM_TLB]>,
}

impl Machine {
    /// Creates a machine with `ram_size` bytes of RAM, of which the first
    /// `kernel_size` bytes (rounded up to a page) hold the kernel image.
    ///
    /// # Panics
    ///
    /// Panics if `ram_size` is not a whole number of pages, exceeds what kseg0
    /// can map, or is too small to hold the kernel image.
    pub fn new(ram_size: usize, kernel_size: usize) -> Self {
        assert!(
            ram_size.is_multiple_of(PAGE_SIZE),
            "RAM size must be a multiple of the page size"
        );
        assert!(ram_size <= MAX_RAM, "RAM size exceeds the kseg0 window");
        let kernel_end = kernel_size.next_multiple_of(PAGE_SIZE);
        assert!(kernel_end < ram_size, "kernel image does not fit in RAM");

        Self {
            ram: Mutex::new(vec![0u8; ram_size].into_boxed_slice()),
            first_free: AtomicU32::new(kernel_end as u32),
            last_paddr: ram_size as u32,
            tlb: Mutex::new(core::array::from_fn(TlbEntry::invalid)),
        }
    }

    /// Returns the total amount of RAM, kernel image included.
    pub fn ram_size(&self) -> usize {
        self.last_paddr as usize
    }

    /// Takes `npages` contiguous pages from the bottom of free RAM.
    ///
    /// Memory stolen this way is never returned. Returns `None` when RAM is
    /// exhausted or once [`ram_getsize`](Self::ram_getsize) has been called.
    pub fn ram_stealmem(&self, npages: usize) -> Option<PhysicalAddress> {
        let size = u32::try_from(npages.checked_mul(PAGE_SIZE)?).ok()?;
        loop {
            let current = self.first_free.load(Ordering::Acquire);
            if current == STEAL_CLOSED {
                return None;
            }
            let end = current.checked_add(size)?;
            if end > self.last_paddr {
                return None;
            }
            if self
                .first_free
                .compare_exchange(current, end, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                trace!("ram_stealmem: {npages} pages at {current:#010x}");
                return Some(PhysicalAddress::new(current));
            }
        }
    }

    /// Returns the range of physical memory not yet stolen, as `(first, last)`.
    ///
    /// After this call `ram_stealmem` always fails.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub fn ram_getsize(&self) -> (PhysicalAddress, PhysicalAddress) {
        let first = self.first_free.swap(STEAL_CLOSED, Ordering::AcqRel);
        assert!(first != STEAL_CLOSED, "ram_getsize called twice");
        (
            PhysicalAddress::new(first),
            PhysicalAddress::new(self.last_paddr),
        )
    }

    fn check_range(&self, paddr: PhysicalAddress, len: usize) -> core::ops::Range<usize> {
        let start = paddr.as_usize();
        let end = start.checked_add(len).unwrap_or(usize::MAX);
        assert!(
            end <= self.last_paddr as usize,
            "physical access {paddr}+{len:#x} out of bounds"
        );
        start..end
    }

    /// Copies physical memory at `paddr` into `buf`.
    pub fn read(&self, paddr: PhysicalAddress, buf: &mut [u8]) {
        let range = self.check_range(paddr, buf.len());
        buf.copy_from_slice(&self.ram.lock()[range]);
    }

    /// Copies `data` into physical memory at `paddr`.
    pub fn write(&self, paddr: PhysicalAddress, data: &[u8]) {
        let range = self.check_range(paddr, data.len());
        self.ram.lock()[range].copy_from_slice(data);
    }

    /// Copies `len` bytes of physical memory from `src` to `dst`.
    pub fn copy(&self, dst: PhysicalAddress, src: PhysicalAddress, len: usize) {
        let from = self.check_range(src, len);
        let to = self.check_range(dst, len);
        self.ram.lock().copy_within(from, to.start);
    }

    /// Sets `len` bytes of physical memory at `paddr` to `byte`.
    pub fn fill(&self, paddr: PhysicalAddress, byte: u8, len: usize) {
        let range = self.check_range(paddr, len);
        self.ram.lock()[range].fill(byte);
    }

    /// Writes TLB slot `index`.
    pub fn tlb_write(&self, entryhi: u32, entrylo: u32, index: usize) {
        assert!(index < NUM_TLB, "TLB index {index} out of range");
        self.tlb.lock()[index] = TlbEntry { entryhi, entrylo };
    }

    /// Reads TLB slot `index`.
    pub fn tlb_read(&self, index: usize) -> TlbEntry {
        assert!(index < NUM_TLB, "TLB index {index} out of range");
        self.tlb.lock()[index]
    }
}
