//! Page and frame number types for memory management.
//!
//! This module provides newtypes for physical frame numbers and virtual page numbers,
//! which are used throughout the memory management subsystem.

use crate::{
    address::{PhysicalAddress, VirtualAddress},
    machine::PAGE_SIZE,
};
use core::{
    fmt,
    ops::{Add, Sub},
};

/// Macro to define common page/frame number functionality.
///
/// This macro generates the basic structure and methods common to both frame
/// and page number types, reducing code duplication.
macro_rules! impl_page_number_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new page/frame number.
            #[inline]
            pub const fn new(number: usize) -> Self {
                Self(number)
            }

            /// Returns the raw page/frame number.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: usize) -> Self::Output {
                Self(self.0 - rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_page_number_common!(
    FrameNumber,
    "A physical memory frame number.\n\n\
     Frame numbers are zero-indexed and correspond to PAGE_SIZE-aligned physical addresses."
);

impl FrameNumber {
    /// Returns the physical address at the start of this frame.
    #[inline]
    pub const fn start(self) -> PhysicalAddress {
        PhysicalAddress::new((self.0 * PAGE_SIZE) as u32)
    }
}

impl From<PhysicalAddress> for FrameNumber {
    #[inline]
    fn from(addr: PhysicalAddress) -> Self {
        addr.frame_number()
    }
}

impl_page_number_common!(
    PageNumber,
    "A virtual memory page number.\n\n\
     Page numbers are zero-indexed and correspond to PAGE_SIZE-aligned virtual addresses."
);

impl PageNumber {
    /// Returns the virtual address at the start of this page.
    #[inline]
    pub const fn start(self) -> VirtualAddress {
        VirtualAddress::new((self.0 * PAGE_SIZE) as u32)
    }
}

impl From<VirtualAddress> for PageNumber {
    #[inline]
    fn from(addr: VirtualAddress) -> Self {
        addr.page_number()
    }
}
