//! Spin-based locks for the file server.
//!
//! `SpinMutex` serializes cache bookkeeping, `SpinRwLock` guards page content
//! and the fault area table. Waiters spin on the hardware hint, or yield to
//! the host scheduler when the `std` feature is enabled.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod mutex;

pub use mutex::*;

/// Backs off once inside a lock wait loop.
#[inline(always)]
pub(crate) fn relax() {
    #[cfg(feature = "std")]
    std::thread::yield_now();
    #[cfg(not(feature = "std"))]
    core::hint::spin_loop();
}

/// Number of failed attempts after which a waiter reports a probable deadlock.
pub(crate) const DEADLOCK_REPORT_TRIES: usize = 0x1000_0000;
