//! User address spaces.
//!
//! An address space has up to two static regions (typically code and data), a
//! fixed-size stack just below [`USERSTACK`] and a heap that starts right after
//! the last region and grows with `sbrk`. Every region is backed by a single
//! contiguous run of physical frames from the [`Coremap`], allocated up front by
//! [`AddressSpace::prepare_load`]; the heap gets a reserve of [`HEAPPAGES`]
//! frames it grows into.
//!
//! ```text
//!   0x80000000  USERSTACK ─┐
//!                          │ stack (VM_STACKPAGES)
//!               stack floor┘
//!                 ...
//!               heap end  ─┐
//!                          │ heap (≤ HEAPPAGES)
//!               heap start ┤
//!                          │ region 2
//!                          ┤
//!                          │ region 1
//! ```

use core::fmt;
use core::num::NonZeroU32;
use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, trace};
use synch::SplGuard;

use crate::{
    Coremap, HumanSize, NUM_TLB, PAGE_SIZE, PageFlags, PageNumber, PageTable, PhysicalAddress,
    TLBLO_INVALID, VirtualAddress, VmError, tlbhi_invalid,
};

/// Top of the user stack; the initial user stack pointer.
pub const USERSTACK: VirtualAddress = VirtualAddress::new(0x8000_0000);

/// Number of pages in a user stack.
pub const VM_STACKPAGES: usize = 12;

/// Maximum number of pages a heap may grow to.
pub const HEAPPAGES: usize = 32;

const STACK_FLOOR: VirtualAddress =
    VirtualAddress::new(USERSTACK.as_u32() - (VM_STACKPAGES * PAGE_SIZE) as u32);

/// Identity of an address space, used to stamp frame ownership.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AddressSpaceId(NonZeroU32);

impl AddressSpaceId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(1);
        let id = NEXT.fetch_add(1, Ordering::Relaxed);
        match NonZeroU32::new(id) {
            Some(id) => Self(id),
            None => panic!("address space ids exhausted"),
        }
    }

    pub const fn as_u32(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Debug for AddressSpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "as#{}", self.0)
    }
}

/// A static program region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Page-aligned virtual base.
    pub vbase: VirtualAddress,
    pub npages: usize,
    /// First frame of the backing run, once loaded.
    pub pbase: Option<PhysicalAddress>,
}

impl Region {
    pub const fn size(&self) -> usize {
        self.npages * PAGE_SIZE
    }

    pub fn contains(&self, vaddr: VirtualAddress) -> bool {
        vaddr >= self.vbase && vaddr - self.vbase < self.size()
    }

    const fn unbacked(self) -> Self {
        Self {
            pbase: None,
            ..self
        }
    }
}

/// A user address space.
///
/// Dropping an address space returns all of its backing frames to the coremap.
pub struct AddressSpace {
    id: AddressSpaceId,
    coremap: Arc<Coremap>,
    page_table: PageTable,
    regions: [Option<Region>; 2],
    stack: Option<PhysicalAddress>,
    heap_start: VirtualAddress,
    heap_end: VirtualAddress,
    heap: Option<PhysicalAddress>,
}

impl AddressSpace {
    /// Creates an empty address space drawing frames from `coremap`.
    pub fn create(coremap: &Arc<Coremap>) -> Self {
        let id = AddressSpaceId::next();
        trace!("{id:?}: created");
        Self {
            id,
            coremap: Arc::clone(coremap),
            page_table: PageTable::new(),
            regions: [None; 2],
            stack: None,
            heap_start: VirtualAddress::new(0),
            heap_end: VirtualAddress::new(0),
            heap: None,
        }
    }

    pub fn id(&self) -> AddressSpaceId {
        self.id
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn region(&self, index: usize) -> Option<&Region> {
        self.regions.get(index).and_then(Option::as_ref)
    }

    pub fn heap_start(&self) -> VirtualAddress {
        self.heap_start
    }

    pub fn heap_end(&self) -> VirtualAddress {
        self.heap_end
    }

    /// Lowest address of the stack region.
    pub const fn stack_floor() -> VirtualAddress {
        STACK_FLOOR
    }

    /// Defines a static region of `size` bytes at `vaddr`.
    ///
    /// The region is widened to whole pages. The (empty) heap is placed directly
    /// after the most recently defined region.
    pub fn define_region(
        &mut self,
        vaddr: VirtualAddress,
        size: usize,
        flags: PageFlags,
    ) -> Result<(), VmError> {
        let Some(slot) = self.regions.iter().position(Option::is_none) else {
            debug!("{:?}: rejecting third region at {vaddr}", self.id);
            return Err(VmError::Unimplemented);
        };

        let size = size + vaddr.page_offset();
        let vbase = vaddr.align_down(PAGE_SIZE);
        let npages = size.div_ceil(PAGE_SIZE);
        let end = vbase
            .checked_add(npages * PAGE_SIZE)
            .ok_or(VmError::InvalidArgument)?;

        self.page_table.push_range(vbase, npages, flags);
        self.regions[slot] = Some(Region {
            vbase,
            npages,
            pbase: None,
        });
        self.heap_start = end;
        self.heap_end = end;

        debug!(
            "{:?}: region {} at {vbase}, {} {flags:?}",
            self.id,
            slot + 1,
            HumanSize::pages(npages)
        );
        Ok(())
    }

    /// Allocates physical backing for both regions, the stack and the heap
    /// reserve.
    ///
    /// On failure the runs allocated so far stay recorded and are released when
    /// the address space is dropped.
    ///
    /// # Panics
    ///
    /// Panics if the address space already has backing.
    pub fn prepare_load(&mut self) -> Result<(), VmError> {
        assert!(
            self.regions.iter().flatten().all(|r| r.pbase.is_none())
                && self.stack.is_none()
                && self.heap.is_none(),
            "{:?} prepared for loading twice",
            self.id
        );

        let owner = Some(self.id);
        for region in self.regions.iter_mut().flatten() {
            if region.npages > 0 {
                region.pbase = Some(self.coremap.allocate(region.npages, owner)?);
            }
        }
        self.stack = Some(self.coremap.allocate(VM_STACKPAGES, owner)?);
        self.heap = Some(self.coremap.allocate(HEAPPAGES, owner)?);

        for (pbase, npages) in self.runs() {
            self.coremap.machine().fill(pbase, 0, npages * PAGE_SIZE);
        }
        trace!("{:?}: backing allocated", self.id);
        Ok(())
    }

    pub fn complete_load(&mut self) -> Result<(), VmError> {
        Ok(())
    }

    /// Maps the user stack and returns the initial stack pointer.
    pub fn define_stack(&mut self) -> Result<VirtualAddress, VmError> {
        let top = USERSTACK.page_number();
        for i in 1..=VM_STACKPAGES {
            self.page_table.push((top - i).start(), PageFlags::RWX);
        }
        Ok(USERSTACK)
    }

    /// Duplicates this address space for `fork`.
    ///
    /// The copy has the same geometry and page table but its own frames, filled
    /// with a byte-for-byte copy of this address space's memory.
    pub fn copy(&self) -> Result<AddressSpace, VmError> {
        let mut new = AddressSpace::create(&self.coremap);
        new.regions = self.regions.map(|r| r.map(Region::unbacked));
        new.heap_start = self.heap_start;
        new.heap_end = self.heap_end;
        new.page_table = self.page_table.clone();

        if let Err(err) = new.prepare_load() {
            debug!("{:?}: copy of {:?} failed: {err}", new.id, self.id);
            return Err(err);
        }

        let machine = self.coremap.machine();
        for ((src, npages), (dst, _)) in self.runs().into_iter().zip(new.runs()) {
            machine.copy(dst, src, npages * PAGE_SIZE);
        }

        debug!("{:?}: copied from {:?}", new.id, self.id);
        Ok(new)
    }

    /// Makes this address space current by flushing every TLB entry.
    pub fn activate(&self) {
        let _spl = SplGuard::raise();
        let machine = self.coremap.machine();
        for i in 0..NUM_TLB {
            machine.tlb_write(tlbhi_invalid(i), TLBLO_INVALID, i);
        }
    }

    /// Tears the address space down, returning its frames to the coremap.
    pub fn destroy(self) {
        drop(self);
    }

    /// Grows the heap by `amount` bytes and returns the previous heap end.
    ///
    /// An `amount` of zero only queries the heap end. Shrinking is not
    /// supported, and an address space without regions has no heap.
    pub fn grow_heap(&mut self, amount: isize) -> Result<VirtualAddress, VmError> {
        let old_end = self.heap_end;
        if amount == 0 {
            return Ok(old_end);
        }
        if self.regions[0].is_none() {
            return Err(VmError::InvalidArgument);
        }
        let bytes = usize::try_from(amount).map_err(|_| VmError::InvalidArgument)?;

        let new_end = old_end.checked_add(bytes).ok_or(VmError::InvalidArgument)?;
        let new_page_end = pages_covering(new_end);
        if new_page_end - self.heap_start.page_number() > HEAPPAGES {
            return Err(VmError::OutOfMemory);
        }
        if new_end >= STACK_FLOOR {
            return Err(VmError::InvalidArgument);
        }

        let first_new = pages_covering(old_end);
        let added = new_page_end - first_new;
        self.page_table.push_range(first_new.start(), added, PageFlags::RW);
        self.heap_end = new_end;

        trace!("{:?}: heap {old_end} -> {new_end} (+{added} pages)", self.id);
        Ok(old_end)
    }

    /// Translates a user address to the physical address backing it.
    pub fn translate(&self, vaddr: VirtualAddress) -> Option<PhysicalAddress> {
        for region in self.regions.iter().flatten() {
            if region.contains(vaddr) {
                return region.pbase.map(|p| p + (vaddr - region.vbase));
            }
        }
        if vaddr >= STACK_FLOOR && vaddr < USERSTACK {
            return self.stack.map(|p| p + (vaddr - STACK_FLOOR));
        }
        let heap_top = self.heap_end.align_up(PAGE_SIZE);
        if vaddr >= self.heap_start && vaddr < heap_top {
            return self.heap.map(|p| p + (vaddr - self.heap_start));
        }
        None
    }

    /// Copies `data` into user memory at `vaddr`.
    pub fn copyout(&self, vaddr: VirtualAddress, data: &[u8]) -> Result<(), VmError> {
        let paddr = self.translate_range(vaddr, data.len())?;
        self.coremap.machine().write(paddr, data);
        Ok(())
    }

    /// Copies user memory at `vaddr` into `buf`.
    pub fn copyin(&self, vaddr: VirtualAddress, buf: &mut [u8]) -> Result<(), VmError> {
        let paddr = self.translate_range(vaddr, buf.len())?;
        self.coremap.machine().read(paddr, buf);
        Ok(())
    }

    /// Translates a user range that must be backed by one contiguous run.
    fn translate_range(
        &self,
        vaddr: VirtualAddress,
        len: usize,
    ) -> Result<PhysicalAddress, VmError> {
        let start = self.translate(vaddr).ok_or(VmError::BadAddress)?;
        if len > 1 {
            let last = vaddr.checked_add(len - 1).ok_or(VmError::BadAddress)?;
            match self.translate(last) {
                Some(end) if end >= start && end - start == len - 1 => {}
                _ => return Err(VmError::BadAddress),
            }
        }
        Ok(start)
    }

    /// The backing runs in a fixed order: region 1, region 2, stack, heap.
    fn runs(&self) -> Vec<(PhysicalAddress, usize)> {
        let stack = self.stack.map(|p| (p, VM_STACKPAGES));
        let heap = self.heap.map(|p| (p, HEAPPAGES));
        self.regions
            .iter()
            .flatten()
            .filter_map(|r| r.pbase.map(|p| (p, r.npages)))
            .chain(stack)
            .chain(heap)
            .collect()
    }
}

/// The first page wholly above `end`.
fn pages_covering(end: VirtualAddress) -> PageNumber {
    PageNumber::new(end.as_usize().div_ceil(PAGE_SIZE))
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        let mut released = 0;
        for (pbase, npages) in self.runs() {
            self.coremap.release(pbase);
            released += npages;
        }
        debug!(
            "{:?}: destroyed, released {}",
            self.id,
            HumanSize::pages(released)
        );
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("id", &self.id)
            .field("regions", &self.regions)
            .field("stack", &self.stack)
            .field("heap", &(self.heap_start..self.heap_end))
            .field("ptes", &self.page_table.len())
            .finish()
    }
}
