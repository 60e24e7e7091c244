//! Human-readable sizes for memory log lines.

use core::fmt;

use crate::PAGE_SIZE;

/// Wraps a size in bytes and formats it with binary prefixes (KiB, MiB, GiB).
///
/// Whole values print without decimals, everything else with one decimal place.
///
/// ```
/// use vm::HumanSize;
///
/// assert_eq!(HumanSize(1023).to_string(), "1023B");
/// assert_eq!(HumanSize(1536).to_string(), "1.5KiB");
/// assert_eq!(HumanSize::pages(256).to_string(), "1MiB");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct HumanSize(pub usize);

impl HumanSize {
    /// The size of `npages` pages.
    #[inline]
    pub const fn pages(npages: usize) -> Self {
        Self(npages * PAGE_SIZE)
    }
}

impl fmt::Display for HumanSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB"];

        let mut unit = 0;
        let mut scale = 1usize;
        while unit < UNITS.len() - 1 && self.0 / scale >= 1024 {
            scale *= 1024;
            unit += 1;
        }

        let whole = self.0 / scale;
        let tenths = (self.0 % scale) * 10 / scale;
        if tenths == 0 {
            write!(f, "{whole}{}", UNITS[unit])
        } else {
            write!(f, "{whole}.{tenths}{}", UNITS[unit])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_bytes() {
        assert_eq!(HumanSize(0).to_string(), "0B");
        assert_eq!(HumanSize(512).to_string(), "512B");
    }

    #[test]
    fn formats_binary_units() {
        assert_eq!(HumanSize(1024).to_string(), "1KiB");
        assert_eq!(HumanSize(1536).to_string(), "1.5KiB");
        assert_eq!(HumanSize(16 * 1024 * 1024).to_string(), "16MiB");
        assert_eq!(HumanSize(1610612736).to_string(), "1.5GiB");
    }

    #[test]
    fn formats_pages() {
        assert_eq!(HumanSize::pages(1).to_string(), "4KiB");
        assert_eq!(HumanSize::pages(12).to_string(), "48KiB");
    }
}
