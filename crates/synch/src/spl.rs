//! Interrupt priority level of the simulated CPU.
//!
//! Each executing thread carries its own priority level. Raising it to
//! [`SPL_HIGH`] marks a section that must not be preempted and must not sleep;
//! the blocking primitives assert that they are entered at [`SPL_LOW`].

use core::cell::Cell;
use core::marker::PhantomData;

/// All interrupts enabled.
pub const SPL_LOW: u32 = 0;

/// All interrupts disabled.
pub const SPL_HIGH: u32 = 15;

thread_local! {
    static CURSPL: Cell<u32> = const { Cell::new(SPL_LOW) };
}

/// Returns the current interrupt priority level.
pub fn curspl() -> u32 {
    CURSPL.with(Cell::get)
}

/// Disables interrupts, returning the previous level for [`splx`].
pub fn splhigh() -> u32 {
    splx(SPL_HIGH)
}

/// Sets the interrupt priority level, returning the previous one.
pub fn splx(level: u32) -> u32 {
    CURSPL.with(|spl| spl.replace(level))
}

/// Returns true when it is legal to block.
pub fn can_sleep() -> bool {
    curspl() == SPL_LOW
}

/// RAII guard that raises the priority level on creation and restores the
/// previous level on drop.
///
/// The guard is `!Send`: the level belongs to the thread that raised it.
pub struct SplGuard {
    saved: u32,
    _not_send: PhantomData<*const ()>,
}

impl SplGuard {
    /// Equivalent to `splhigh()` paired with `splx(saved)` on drop.
    #[must_use]
    pub fn raise() -> Self {
        Self {
            saved: splhigh(),
            _not_send: PhantomData,
        }
    }
}

impl Drop for SplGuard {
    fn drop(&mut self) {
        splx(self.saved);
    }
}
