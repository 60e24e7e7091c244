//! # Cinder synchronization primitives
//!
//! Blocking and busy-waiting primitives used throughout the kernel:
//!
//! - [`Spinlock`]: busy-waits with the interrupt priority level raised; never sleeps.
//! - [`Semaphore`]: counting semaphore with `P`/`V`.
//! - [`Lock`]: sleeping mutual-exclusion lock with an explicit holder.
//! - [`Cv`]: condition variable paired with a [`Lock`].
//!
//! Every primitive records *which* thread holds it (see [`ThreadId`]) so that
//! re-entrant acquisition and foreign release are caught as assertion failures
//! instead of silently corrupting state.
//!
//! Sleeping is implemented by [`WaitChannel`], which deschedules the calling host
//! thread until another thread wakes it.

mod cv;
mod lock;
mod semaphore;
pub mod spl;
mod spinlock;
mod thread;
mod wchan;

pub use cv::Cv;
pub use lock::{Lock, LockGuard};
pub use semaphore::Semaphore;
pub use spinlock::{Spinlock, SpinlockGuard};
pub use spl::SplGuard;
pub use thread::ThreadId;
pub use wchan::{Sleeper, WaitChannel};
