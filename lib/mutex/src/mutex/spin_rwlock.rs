//! Reader/writer spin lock.
//!
//! The raw lock is `spin`'s rwlock, wrapped by `lock_api` so that a lock held
//! in an `Arc` can hand out owned guards (`read_arc`, `write_arc`) that keep
//! the lock alive on their own. The page cache relies on those: a page guard
//! outlives the cache lock critical section that located the page.

#[cfg(feature = "std")]
type Relax = spin::relax::Yield;
#[cfg(not(feature = "std"))]
type Relax = spin::relax::Spin;

pub type RawSpinRwLock = spin::rwlock::RwLock<(), Relax>;

pub type SpinRwLock<T> = lock_api::RwLock<RawSpinRwLock, T>;

/// Shared guard owning a reference to its lock.
pub type ArcReadGuard<T> = lock_api::ArcRwLockReadGuard<RawSpinRwLock, T>;

/// Exclusive guard owning a reference to its lock.
pub type ArcWriteGuard<T> = lock_api::ArcRwLockWriteGuard<RawSpinRwLock, T>;

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;

    use super::SpinRwLock;

    #[test]
    fn readers_share_and_writer_excludes() {
        let lock = SpinRwLock::new(5);
        let r1 = lock.read();
        let r2 = lock.read();
        assert_eq!(*r1 + *r2, 10);
        assert!(lock.try_write().is_none());
        drop((r1, r2));
        let mut w = lock.write();
        *w = 7;
        assert!(lock.try_read().is_none());
        drop(w);
        assert_eq!(*lock.read(), 7);
    }

    #[test]
    fn failed_try_write_keeps_readers_holding() {
        let lock = SpinRwLock::new(0u32);
        let r = lock.read();
        assert!(lock.try_write().is_none());
        assert!(lock.try_write().is_none());
        assert_eq!(*r, 0);
        drop(r);
        assert!(lock.try_write().is_some());
    }

    #[test]
    fn failed_try_read_keeps_writer_holding() {
        let lock = SpinRwLock::new(0u32);
        let mut w = lock.write();
        assert!(lock.try_read().is_none());
        assert!(lock.try_write().is_none());
        *w = 3;
        drop(w);
        assert_eq!(*lock.try_read().unwrap(), 3);
    }

    #[test]
    fn owned_guards_keep_the_lock() {
        let lock = Arc::new(SpinRwLock::new([0u8; 4]));
        let mut w = lock.write_arc();
        w[1] = 9;
        let other = lock.clone();
        assert!(other.try_read().is_none());
        drop(w);
        let r = other.read_arc();
        assert_eq!(r[1], 9);
        assert!(lock.try_write().is_none());
        drop(r);
        assert!(lock.try_write_arc().is_some());
    }
}
