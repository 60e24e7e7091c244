//! Physical frame allocator.
//!
//! The coremap owns every physical frame left after boot. It keeps one
//! [`FrameDescriptor`] per frame and hands out contiguous runs of frames with a
//! first-fit search. The descriptor array itself lives in the first frames of
//! the managed range, which are excluded from allocation.
//!
//! Until [`Coremap::initialize`] runs, allocations are served by the machine's
//! bump allocator (`ram_stealmem`). Those frames are permanently lost to the
//! coremap and can never be released.

use std::sync::Arc;

use log::{debug, trace};
use synch::{Spinlock, SplGuard};

use crate::{
    AddressSpaceId, FrameDescriptor, FrameNumber, FrameState, HumanSize, Machine, PAGE_SIZE,
    PhysicalAddress, VmError,
};

/// Bytes of physical memory reserved per tracked frame for its descriptor.
pub const FRAME_DESCRIPTOR_SIZE: usize = 16;

struct CoremapState {
    initialized: bool,
    /// First frame managed by the allocator.
    base: FrameNumber,
    frames: Vec<FrameDescriptor>,
    free_count: usize,
    /// No free frame exists below this index.
    next_free: usize,
}

impl CoremapState {
    fn index_of(&self, paddr: PhysicalAddress) -> usize {
        assert!(
            paddr.is_aligned(PAGE_SIZE),
            "physical address {paddr} is not page aligned"
        );
        let frame = paddr.frame_number();
        assert!(
            frame >= self.base && frame - self.base < self.frames.len(),
            "physical address {paddr} is not managed by the coremap"
        );
        frame - self.base
    }

    fn find_run(&self, npages: usize) -> Option<usize> {
        let mut start = self.next_free;
        let mut len = 0;
        for (index, frame) in self.frames.iter().enumerate().skip(self.next_free) {
            if frame.state.is_free() {
                if len == 0 {
                    start = index;
                }
                len += 1;
                if len == npages {
                    return Some(start);
                }
            } else {
                len = 0;
            }
        }
        None
    }

    fn advance_hint(&mut self) {
        while self.next_free < self.frames.len() && !self.frames[self.next_free].state.is_free() {
            self.next_free += 1;
        }
    }
}

/// The physical frame allocator.
pub struct Coremap {
    machine: Arc<Machine>,
    state: Spinlock<CoremapState>,
}

impl Coremap {
    /// Creates a coremap in bootstrap mode on top of `machine`.
    pub fn new(machine: Arc<Machine>) -> Self {
        Self {
            machine,
            state: Spinlock::new(
                "coremap",
                CoremapState {
                    initialized: false,
                    base: FrameNumber::new(0),
                    frames: Vec::new(),
                    free_count: 0,
                    next_free: 0,
                },
            ),
        }
    }

    pub fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }

    /// Takes over all physical memory the boot phase left unused.
    ///
    /// The descriptor array is sized for every remaining frame and placed at the
    /// start of the range; the frames after it become allocatable.
    ///
    /// # Panics
    ///
    /// Panics if called twice, or if the remaining memory cannot even hold the
    /// descriptor array.
    pub fn initialize(&self) {
        let mut state = self.state.lock();
        assert!(!state.initialized, "coremap initialized twice");

        let (first, last) = self.machine.ram_getsize();
        let total = (last - first) / PAGE_SIZE;
        let reserved = (total * FRAME_DESCRIPTOR_SIZE).div_ceil(PAGE_SIZE);
        assert!(
            reserved < total,
            "not enough memory for the coremap ({total} frames)"
        );

        let base = first.frame_number() + reserved;
        let tracked = total - reserved;
        assert_eq!(base.as_usize() + tracked, last.frame_number().as_usize());

        self.machine.fill(first, 0, reserved * PAGE_SIZE);

        state.frames = (0..tracked)
            .map(|i| FrameDescriptor::free((base + i).start().kernel_alias()))
            .collect();
        state.base = base;
        state.free_count = tracked;
        state.next_free = 0;
        state.initialized = true;

        debug!(
            "coremap: {} descriptors at {first}, managing {} from {}",
            HumanSize::pages(reserved),
            HumanSize::pages(tracked),
            base.start(),
        );
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Allocates a run of `npages` physically contiguous frames on behalf of
    /// `owner` (`None` for the kernel) and returns the first frame's address.
    ///
    /// Before [`initialize`](Self::initialize) this steals memory from the
    /// machine instead.
    pub fn allocate(
        &self,
        npages: usize,
        owner: Option<AddressSpaceId>,
    ) -> Result<PhysicalAddress, VmError> {
        if npages == 0 {
            return Err(VmError::InvalidArgument);
        }

        let mut state = self.state.lock();
        if !state.initialized {
            drop(state);
            let _spl = SplGuard::raise();
            return self
                .machine
                .ram_stealmem(npages)
                .ok_or(VmError::OutOfMemory);
        }

        let Some(start) = state.find_run(npages) else {
            trace!("coremap: no run of {npages} free frames");
            return Err(VmError::OutOfMemory);
        };

        for (i, frame) in state.frames[start..start + npages].iter_mut().enumerate() {
            assert!(
                frame.state.is_free(),
                "frame {} allocated twice",
                frame.vaddr
            );
            frame.state = FrameState::Dirty;
            frame.owner = owner;
            frame.run_length = if i == 0 { npages } else { 0 };
        }
        state.free_count -= npages;
        if start == state.next_free {
            state.next_free = start + npages;
            state.advance_hint();
        }

        let paddr = (state.base + start).start();
        trace!("coremap: {npages} frames at {paddr} for {owner:?}");
        Ok(paddr)
    }

    /// Returns the run starting at `paddr` to the free pool.
    ///
    /// # Panics
    ///
    /// Panics if `paddr` is not the first frame of an allocated run, including
    /// memory that was stolen before the coremap was initialized.
    pub fn release(&self, paddr: PhysicalAddress) {
        let mut state = self.state.lock();
        assert!(state.initialized, "release of {paddr} before coremap init");
        let index = state.index_of(paddr);
        assert!(
            state.frames[index].starts_run(),
            "release of {paddr}, which does not start an allocated run"
        );

        let npages = state.frames[index].run_length;
        for frame in &mut state.frames[index..index + npages] {
            frame.state = FrameState::Free;
            frame.owner = None;
            frame.run_length = 0;
        }
        state.free_count += npages;
        state.next_free = state.next_free.min(index);
        trace!("coremap: released {npages} frames at {paddr}");
    }

    /// Number of free frames.
    pub fn free_frames(&self) -> usize {
        self.state.lock().free_count
    }

    /// Number of frames the coremap manages, allocated or not.
    pub fn total_frames(&self) -> usize {
        self.state.lock().frames.len()
    }

    /// Returns the descriptor of the frame containing `paddr`, if it is managed.
    pub fn descriptor(&self, paddr: PhysicalAddress) -> Option<FrameDescriptor> {
        let state = self.state.lock();
        let frame = paddr.frame_number();
        if frame < state.base {
            return None;
        }
        state.frames.get(frame - state.base).copied()
    }

    pub fn frame_state(&self, paddr: PhysicalAddress) -> Option<FrameState> {
        self.descriptor(paddr).map(|d| d.state)
    }

    pub fn owner_of(&self, paddr: PhysicalAddress) -> Option<AddressSpaceId> {
        self.descriptor(paddr).and_then(|d| d.owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAM_PAGES: usize = 512;
    const KERNEL_PAGES: usize = 4;

    fn coremap() -> Coremap {
        let machine = Arc::new(Machine::new(RAM_PAGES * PAGE_SIZE, KERNEL_PAGES * PAGE_SIZE));
        Coremap::new(machine)
    }

    fn initialized() -> Coremap {
        let cm = coremap();
        cm.initialize();
        cm
    }

    #[test]
    fn bootstrap_allocations_steal_memory() {
        let cm = coremap();
        let a = cm.allocate(2, None).unwrap();
        let b = cm.allocate(1, None).unwrap();
        assert_eq!(a.as_usize(), KERNEL_PAGES * PAGE_SIZE);
        assert_eq!(b.as_usize(), (KERNEL_PAGES + 2) * PAGE_SIZE);
        assert!(!cm.is_initialized());
    }

    #[test]
    fn initialize_reserves_descriptor_frames() {
        let cm = initialized();
        let total = RAM_PAGES - KERNEL_PAGES;
        let reserved = (total * FRAME_DESCRIPTOR_SIZE).div_ceil(PAGE_SIZE);
        assert_eq!(cm.total_frames(), total - reserved);
        assert_eq!(cm.free_frames(), cm.total_frames());
    }

    #[test]
    fn stolen_memory_is_excluded_after_initialize() {
        let cm = coremap();
        let stolen = cm.allocate(3, None).unwrap();
        cm.initialize();
        assert!(cm.descriptor(stolen).is_none());
        let fresh = cm.allocate(1, None).unwrap();
        assert!(fresh > stolen);
    }

    #[test]
    #[should_panic(expected = "coremap initialized twice")]
    fn double_initialize_panics() {
        let cm = initialized();
        cm.initialize();
    }

    #[test]
    fn allocate_and_release_run() {
        let cm = initialized();
        let before = cm.free_frames();
        let owner = AddressSpaceId::next();

        let pa = cm.allocate(4, Some(owner)).unwrap();
        assert_eq!(cm.free_frames(), before - 4);
        for i in 0..4 {
            let d = cm.descriptor(pa + i * PAGE_SIZE).unwrap();
            assert_eq!(d.state, FrameState::Dirty);
            assert_eq!(d.owner, Some(owner));
            assert_eq!(d.run_length, if i == 0 { 4 } else { 0 });
        }

        cm.release(pa);
        assert_eq!(cm.free_frames(), before);
        assert_eq!(cm.frame_state(pa), Some(FrameState::Free));
        assert_eq!(cm.owner_of(pa), None);
    }

    #[test]
    fn runs_do_not_overlap() {
        let cm = initialized();
        let a = cm.allocate(3, None).unwrap();
        let b = cm.allocate(2, None).unwrap();
        assert_eq!(b - a, 3 * PAGE_SIZE);
    }

    #[test]
    fn first_fit_reuses_released_hole() {
        let cm = initialized();
        let a = cm.allocate(2, None).unwrap();
        let b = cm.allocate(2, None).unwrap();
        let _c = cm.allocate(2, None).unwrap();

        cm.release(b);
        // Too large for the hole, so it lands after c.
        let d = cm.allocate(3, None).unwrap();
        assert!(d > b);
        // Fits the hole exactly.
        assert_eq!(cm.allocate(2, None).unwrap(), b);
        assert!(a < b);
    }

    #[test]
    fn exhaustion_returns_out_of_memory() {
        let cm = initialized();
        let total = cm.total_frames();
        assert_eq!(cm.allocate(total + 1, None), Err(VmError::OutOfMemory));
        let all = cm.allocate(total, None).unwrap();
        assert_eq!(cm.free_frames(), 0);
        assert_eq!(cm.allocate(1, None), Err(VmError::OutOfMemory));
        cm.release(all);
        assert_eq!(cm.free_frames(), total);
    }

    #[test]
    fn zero_pages_is_rejected() {
        let cm = initialized();
        assert_eq!(cm.allocate(0, None), Err(VmError::InvalidArgument));
    }

    #[test]
    #[should_panic(expected = "does not start an allocated run")]
    fn releasing_inside_a_run_panics() {
        let cm = initialized();
        let pa = cm.allocate(2, None).unwrap();
        cm.release(pa + PAGE_SIZE);
    }

    #[test]
    #[should_panic(expected = "does not start an allocated run")]
    fn double_release_panics() {
        let cm = initialized();
        let pa = cm.allocate(1, None).unwrap();
        cm.release(pa);
        cm.release(pa);
    }

    #[test]
    fn kernel_alias_recorded_per_frame() {
        let cm = initialized();
        let pa = cm.allocate(1, None).unwrap();
        assert_eq!(cm.descriptor(pa).unwrap().vaddr, pa.kernel_alias());
    }

    #[test]
    fn concurrent_allocations_are_disjoint() {
        let cm = Arc::new(initialized());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cm = Arc::clone(&cm);
                std::thread::spawn(move || {
                    (0..16)
                        .map(|_| cm.allocate(1, None).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<_> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 64);
    }
}
