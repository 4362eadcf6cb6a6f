use spin_mutex::SpinMutex;

pub mod spin_mutex;
pub mod spin_rwlock;

pub use spin_rwlock::{ArcReadGuard, ArcWriteGuard, SpinRwLock};

pub type SpinLock<T> = SpinMutex<T, Spin>;

/// Low-level support for mutex(spinlock, rwlock, etc)
pub trait MutexSupport {
    /// Guard data
    type GuardData;
    /// Called before lock() & try_lock()
    fn before_lock() -> Self::GuardData;
    /// Called when MutexGuard dropping
    fn after_unlock(_: &mut Self::GuardData);
}

/// Spin MutexSupport
#[derive(Debug)]
pub struct Spin;

impl MutexSupport for Spin {
    type GuardData = ();
    #[inline(always)]
    fn before_lock() -> Self::GuardData {}
    #[inline(always)]
    fn after_unlock(_: &mut Self::GuardData) {}
}
