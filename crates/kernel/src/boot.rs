use std::sync::Arc;

use log::{debug, info};
use vm::{Coremap, HumanSize, Machine, PAGE_SIZE, PhysicalAddress};

use crate::{Errno, ProcessTable};

/// Machine and boot parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    /// Bytes of physical RAM.
    pub ram_size: usize,
    /// Bytes at the bottom of RAM occupied by the kernel image.
    pub kernel_size: usize,
    /// Pages stolen for the kernel's early data before the coremap exists.
    pub boot_pages: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            ram_size: 8 * 1024 * 1024,
            kernel_size: 256 * 1024,
            boot_pages: 8,
        }
    }
}

/// A booted kernel: the machine, its memory and its processes.
pub struct Kernel {
    config: KernelConfig,
    coremap: Arc<Coremap>,
    processes: ProcessTable,
    boot_memory: PhysicalAddress,
}

impl Kernel {
    /// Brings up the memory system and the process table.
    ///
    /// Early boot memory is stolen from RAM before the coremap takes over the
    /// rest, so it is never tracked and never freed.
    ///
    /// # Panics
    ///
    /// Panics if `config` describes an impossible machine.
    pub fn boot(config: KernelConfig) -> Result<Arc<Self>, Errno> {
        let machine = Arc::new(Machine::new(config.ram_size, config.kernel_size));
        info!(
            "cinder: {} of RAM, kernel image {}",
            HumanSize(machine.ram_size()),
            HumanSize(config.kernel_size)
        );

        let coremap = Arc::new(Coremap::new(machine));
        let boot_memory = coremap.allocate(config.boot_pages.max(1), None)?;
        debug!(
            "boot: {} of early memory at {boot_memory}",
            HumanSize::pages(config.boot_pages.max(1))
        );

        coremap.initialize();
        info!(
            "coremap: {} free in {} frames",
            HumanSize(coremap.free_frames() * PAGE_SIZE),
            coremap.total_frames()
        );

        let processes = ProcessTable::bootstrap();
        Ok(Arc::new(Self {
            config,
            coremap,
            processes,
            boot_memory,
        }))
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn machine(&self) -> &Arc<Machine> {
        self.coremap.machine()
    }

    pub fn coremap(&self) -> &Arc<Coremap> {
        &self.coremap
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    /// Start of the memory stolen during boot.
    pub fn boot_memory(&self) -> PhysicalAddress {
        self.boot_memory
    }
}
