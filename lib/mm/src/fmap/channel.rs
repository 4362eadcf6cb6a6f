//! Delivery of page faults from the kernel to the fault handler.
//!
//! A bounded ring carries the messages; a wake-up flag with a condition
//! variable lets the handler sleep while the ring is empty.

use alloc::sync::Arc;
use std::sync::{
    Condvar, Mutex,
    atomic::{AtomicBool, Ordering},
};

use ringbuf::{HeapConsumer, HeapProducer, HeapRb};
use systype::{SysError, SysResult};

use super::kernel::Badge;
use crate::address::VirtAddr;

/// One page fault of a client on a file mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserFaultMsg {
    pub client: Badge,
    pub fault_va: VirtAddr,
}

struct Notification {
    pending: Mutex<bool>,
    cond: Condvar,
    closed: AtomicBool,
}

impl Notification {
    fn notify(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        *pending = true;
        self.cond.notify_one();
    }

    /// Blocks until notified or closed. Returns whether the channel is open.
    fn wait(&self) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        while !*pending && !self.closed.load(Ordering::Acquire) {
            pending = self.cond.wait(pending).unwrap_or_else(|e| e.into_inner());
        }
        *pending = false;
        !self.closed.load(Ordering::Acquire)
    }
}

/// Producing end, owned by the kernel side.
pub struct FaultSender {
    ring: HeapProducer<UserFaultMsg>,
    notification: Arc<Notification>,
}

/// Consuming end, owned by the fault handler.
pub struct FaultReceiver {
    ring: HeapConsumer<UserFaultMsg>,
    notification: Arc<Notification>,
}

/// Creates a fault channel holding up to `capacity` pending messages.
///
/// # Errors
/// [`SysError::EINVAL`] for a zero capacity.
pub fn fault_channel(capacity: usize) -> SysResult<(FaultSender, FaultReceiver)> {
    if capacity == 0 {
        return Err(SysError::EINVAL);
    }
    let (producer, consumer) = HeapRb::new(capacity).split();
    let notification = Arc::new(Notification {
        pending: Mutex::new(false),
        cond: Condvar::new(),
        closed: AtomicBool::new(false),
    });
    Ok((
        FaultSender {
            ring: producer,
            notification: notification.clone(),
        },
        FaultReceiver {
            ring: consumer,
            notification,
        },
    ))
}

impl FaultSender {
    /// Queues `msg` and wakes the handler. A full ring hands the message
    /// back; the producer has to retry later.
    pub fn send(&mut self, msg: UserFaultMsg) -> Result<(), UserFaultMsg> {
        self.ring.push(msg)?;
        self.notification.notify();
        Ok(())
    }
}

impl Drop for FaultSender {
    fn drop(&mut self) {
        self.notification.closed.store(true, Ordering::Release);
        self.notification.notify();
    }
}

impl FaultReceiver {
    /// Takes the next queued message without blocking.
    pub fn try_recv(&mut self) -> Option<UserFaultMsg> {
        self.ring.pop()
    }

    /// Sleeps until messages may be queued. Returns `false` once the
    /// sender is gone and nothing is left to drain.
    pub fn wait(&self) -> bool {
        if !self.ring.is_empty() {
            return true;
        }
        self.notification.wait() || !self.ring.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.ring.len()
    }
}
