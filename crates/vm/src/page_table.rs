//! Per-address-space page table.
//!
//! The table is a flat, insertion-ordered list of page mappings. It records what
//! each page of the address space may do; physical backing lives with the
//! address space's regions.

use core::fmt;

use crate::{PAGE_SIZE, VirtualAddress};

/// Permission bits of a page, using the `rwx` octal layout.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct PageFlags(u8);

impl PageFlags {
    /// Readable bit.
    pub const READ: Self = Self(0b100);

    /// Writable bit.
    pub const WRITE: Self = Self(0b010);

    /// Executable bit.
    pub const EXECUTE: Self = Self(0b001);

    /// Read, write and execute.
    pub const RWX: Self = Self(0b111);

    /// Read and write.
    pub const RW: Self = Self(0b110);

    /// Creates empty page flags (no access).
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Builds flags from individual permissions.
    pub const fn from_rwx(readable: bool, writable: bool, executable: bool) -> Self {
        let mut bits = 0;
        if readable {
            bits |= Self::READ.0;
        }
        if writable {
            bits |= Self::WRITE.0;
        }
        if executable {
            bits |= Self::EXECUTE.0;
        }
        Self(bits)
    }

    /// Returns the raw permission bits.
    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_readable(self) -> bool {
        self.0 & Self::READ.0 != 0
    }

    pub const fn is_writable(self) -> bool {
        self.0 & Self::WRITE.0 != 0
    }

    pub const fn is_executable(self) -> bool {
        self.0 & Self::EXECUTE.0 != 0
    }
}

impl core::ops::BitOr for PageFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for PageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PageFlags({}{}{})",
            if self.is_readable() { 'r' } else { '-' },
            if self.is_writable() { 'w' } else { '-' },
            if self.is_executable() { 'x' } else { '-' },
        )
    }
}

/// A single page mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry {
    /// Page-aligned virtual address of the page.
    pub vaddr: VirtualAddress,
    /// Set once the page has a TLB-loadable translation.
    pub valid: bool,
    pub flags: PageFlags,
}

#[derive(Debug, Clone, Default)]
pub struct PageTable {
    entries: Vec<PageTableEntry>,
}

impl PageTable {
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends an invalid mapping for the page at `vaddr`.
    ///
    /// # Panics
    ///
    /// Panics if `vaddr` is not page aligned.
    pub fn push(&mut self, vaddr: VirtualAddress, flags: PageFlags) {
        assert!(
            vaddr.is_aligned(PAGE_SIZE),
            "page table entry {vaddr} is not page aligned"
        );
        self.entries.push(PageTableEntry {
            vaddr,
            valid: false,
            flags,
        });
    }

    /// Appends mappings for `npages` consecutive pages starting at `vaddr`.
    pub fn push_range(&mut self, vaddr: VirtualAddress, npages: usize, flags: PageFlags) {
        for i in 0..npages {
            self.push(vaddr + i * PAGE_SIZE, flags);
        }
    }

    /// Finds the mapping covering `vaddr`.
    pub fn find(&self, vaddr: VirtualAddress) -> Option<&PageTableEntry> {
        let page = vaddr.align_down(PAGE_SIZE);
        self.entries.iter().find(|e| e.vaddr == page)
    }

    pub fn find_mut(&mut self, vaddr: VirtualAddress) -> Option<&mut PageTableEntry> {
        let page = vaddr.align_down(PAGE_SIZE);
        self.entries.iter_mut().find(|e| e.vaddr == page)
    }

    pub fn entries(&self) -> &[PageTableEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_use_rwx_bits() {
        assert_eq!(PageFlags::from_rwx(true, false, false).bits(), 4);
        assert_eq!(PageFlags::from_rwx(false, true, false).bits(), 2);
        assert_eq!(PageFlags::from_rwx(false, false, true).bits(), 1);
        assert_eq!(PageFlags::READ | PageFlags::WRITE, PageFlags::RW);
        assert_eq!(format!("{:?}", PageFlags::RWX), "PageFlags(rwx)");
        assert_eq!(format!("{:?}", PageFlags::READ), "PageFlags(r--)");
    }

    #[test]
    fn entries_keep_insertion_order() {
        let mut pt = PageTable::new();
        pt.push(VirtualAddress::new(0x2000), PageFlags::RW);
        pt.push(VirtualAddress::new(0x1000), PageFlags::READ);
        let addrs: Vec<_> = pt.entries().iter().map(|e| e.vaddr.as_u32()).collect();
        assert_eq!(addrs, [0x2000, 0x1000]);
        assert!(pt.entries().iter().all(|e| !e.valid));
    }

    #[test]
    fn find_covers_whole_page() {
        let mut pt = PageTable::new();
        pt.push_range(VirtualAddress::new(0x0040_0000), 2, PageFlags::RWX);
        let e = pt.find(VirtualAddress::new(0x0040_1abc)).unwrap();
        assert_eq!(e.vaddr.as_u32(), 0x0040_1000);
        assert!(pt.find(VirtualAddress::new(0x0040_2000)).is_none());
    }

    #[test]
    #[should_panic(expected = "not page aligned")]
    fn unaligned_entry_panics() {
        PageTable::new().push(VirtualAddress::new(0x1001), PageFlags::READ);
    }
}
