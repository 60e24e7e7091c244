//! Address types for the simulated 32-bit machine.
//!
//! Physical and virtual addresses are both 32 bits wide. The kernel reaches
//! physical memory through the direct-mapped `kseg0` window, so every physical
//! address below 512 MiB has a canonical kernel virtual alias.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{FrameNumber, PageNumber, machine::MIPS_KSEG0, machine::PAGE_SIZE};

/// Size of the direct-mapped kernel window.
const KSEG0_SIZE: u32 = 0x2000_0000;

/// Macro to define common address type functionality.
///
/// This macro generates the basic structure and methods common to both physical
/// and virtual address types, reducing code duplication.
macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Creates a new address.
            #[inline]
            pub const fn new(addr: u32) -> Self {
                Self(addr)
            }

            /// Returns the raw address value.
            #[inline]
            pub const fn as_u32(self) -> u32 {
                self.0
            }

            /// Returns the raw address value widened for indexing.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0 as usize
            }

            /// Returns the offset of this address within its page.
            #[inline]
            pub const fn page_offset(self) -> usize {
                self.0 as usize & (PAGE_SIZE - 1)
            }

            /// Checks if the address is aligned to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                self.0 as usize & (align - 1) == 0
            }

            /// Aligns the address down to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self(self.0 & !(align as u32 - 1))
            }

            /// Aligns the address up to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two, or if the result does not
            /// fit in 32 bits.
            #[inline]
            pub const fn align_up(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                let mask = align as u32 - 1;
                match self.0.checked_add(mask) {
                    Some(v) => Self(v & !mask),
                    None => panic!("address overflow while aligning up"),
                }
            }

            /// Adds a byte offset, returning `None` on 32-bit overflow.
            #[inline]
            pub const fn checked_add(self, bytes: usize) -> Option<Self> {
                if bytes > u32::MAX as usize {
                    return None;
                }
                match self.0.checked_add(bytes as u32) {
                    Some(v) => Some(Self(v)),
                    None => None,
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#010x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#010x}", self.0)
            }
        }

        impl From<u32> for $name {
            #[inline]
            fn from(addr: u32) -> Self {
                Self::new(addr)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                match self.checked_add(rhs) {
                    Some(v) => v,
                    None => panic!("address overflow"),
                }
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: usize) -> Self::Output {
                Self::new(self.0 - rhs as u32)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                (self.0 - rhs.0) as usize
            }
        }
    };
}

impl_address_common!(
    PhysicalAddress,
    "A physical memory address on the simulated machine."
);

impl PhysicalAddress {
    /// Returns the corresponding frame number for this physical address.
    #[inline]
    pub const fn frame_number(self) -> FrameNumber {
        FrameNumber::new(self.0 as usize / PAGE_SIZE)
    }

    /// Returns the kernel's direct-mapped alias of this address.
    ///
    /// # Panics
    ///
    /// Panics if the address lies beyond the direct-mapped window.
    #[inline]
    pub const fn kernel_alias(self) -> VirtualAddress {
        assert!(self.0 < KSEG0_SIZE, "physical address outside kseg0");
        VirtualAddress::new(self.0 + MIPS_KSEG0)
    }
}

impl_address_common!(
    VirtualAddress,
    "A virtual memory address on the simulated machine."
);

impl VirtualAddress {
    /// Returns the page number containing this address.
    #[inline]
    pub const fn page_number(self) -> PageNumber {
        PageNumber::new(self.0 as usize / PAGE_SIZE)
    }

    /// Returns true if this address lies in the kernel's direct-mapped window.
    #[inline]
    pub const fn is_kernel_alias(self) -> bool {
        self.0 >= MIPS_KSEG0 && self.0 - MIPS_KSEG0 < KSEG0_SIZE
    }

    /// Converts a direct-mapped kernel address back to a physical address.
    ///
    /// # Panics
    ///
    /// Panics if this is not a kseg0 address.
    #[inline]
    pub const fn kernel_to_physical(self) -> PhysicalAddress {
        assert!(self.is_kernel_alias(), "not a kseg0 address");
        PhysicalAddress::new(self.0 - MIPS_KSEG0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers() {
        let addr = VirtualAddress::new(0x0040_0123);
        assert_eq!(addr.align_down(PAGE_SIZE).as_u32(), 0x0040_0000);
        assert_eq!(addr.align_up(PAGE_SIZE).as_u32(), 0x0040_1000);
        assert_eq!(addr.page_offset(), 0x123);
        assert!(!addr.is_aligned(PAGE_SIZE));
        assert!(addr.align_up(PAGE_SIZE).is_aligned(PAGE_SIZE));
    }

    #[test]
    fn kernel_alias_round_trips() {
        let pa = PhysicalAddress::new(0x0003_2000);
        let kva = pa.kernel_alias();
        assert_eq!(kva.as_u32(), 0x8003_2000);
        assert!(kva.is_kernel_alias());
        assert_eq!(kva.kernel_to_physical(), pa);
    }

    #[test]
    fn user_addresses_are_not_kernel_aliases() {
        assert!(!VirtualAddress::new(0x0040_0000).is_kernel_alias());
    }

    #[test]
    fn checked_add_detects_overflow() {
        let top = VirtualAddress::new(u32::MAX - 1);
        assert!(top.checked_add(1).is_some());
        assert!(top.checked_add(2).is_none());
    }

    #[test]
    fn frame_and_page_numbers() {
        assert_eq!(PhysicalAddress::new(3 * PAGE_SIZE as u32 + 10).frame_number().as_usize(), 3);
        assert_eq!(VirtualAddress::new(5 * PAGE_SIZE as u32).page_number().as_usize(), 5);
    }
}
