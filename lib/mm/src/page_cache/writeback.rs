//! Periodic write-back of dirty pages.

use alloc::sync::{Arc, Weak};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread::{self, JoinHandle},
    time::Instant,
};

use systype::{SysError, SysResult};

use super::{PageCache, PageCacheBackend};

/// Handle of the background sweep thread.
///
/// The thread wakes every `write_back_cycle` and runs
/// [`PageCache::write_back_once`]. It only holds a weak reference, so it
/// ends by itself once the cache is gone; [`stop`](Self::stop) ends it
/// right away.
pub struct WriteBackRoutine {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl WriteBackRoutine {
    pub fn spawn<B: PageCacheBackend>(cache: &Arc<PageCache<B>>) -> SysResult<Self> {
        let cycle = cache.config().write_back_cycle;
        let cache: Weak<PageCache<B>> = Arc::downgrade(cache);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name("pc-writeback".into())
            .spawn(move || {
                log::debug!("[write_back_routine] started, cycle {:?}", cycle);
                loop {
                    let deadline = Instant::now() + cycle;
                    while !stop_flag.load(Ordering::Acquire) {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        thread::park_timeout(deadline - now);
                    }
                    if stop_flag.load(Ordering::Acquire) {
                        break;
                    }
                    let Some(cache) = cache.upgrade() else {
                        break;
                    };
                    if let Err(e) = cache.write_back_once() {
                        log::error!("[write_back_routine] sweep failed: {:?}", e);
                    }
                }
                log::debug!("[write_back_routine] exit");
            })
            .map_err(|_| SysError::EAGAIN)?;
        Ok(Self { stop, handle })
    }

    /// Ends the thread and waits for it.
    pub fn stop(self) {
        self.stop.store(true, Ordering::Release);
        self.handle.thread().unpark();
        if self.handle.join().is_err() {
            log::error!("[WriteBackRoutine::stop] sweep thread panicked");
        }
    }
}
