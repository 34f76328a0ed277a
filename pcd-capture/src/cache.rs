use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use pcd_core::PointCloudFrame;

type SharedFrame = Arc<PointCloudFrame>;

struct Subscriber {
    id: u64,
    tx: Sender<SharedFrame>,
    // Producer-side handle on the same slot, used to evict a stale frame.
    evict: Receiver<SharedFrame>,
}

/// Holds the single most recent frame. Readers always see a whole frame:
/// the slot is swapped under the lock and frames are never mutated.
/// Subscribers get a one-deep mailbox that only ever holds the newest frame,
/// so a slow subscriber never blocks the producer.
#[derive(Default)]
pub struct FrameCache {
    latest: Mutex<Option<SharedFrame>>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl FrameCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replace the latest frame and notify subscribers.
    pub fn set(&self, frame: SharedFrame) {
        *lock(&self.latest) = Some(frame.clone());

        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|s| match s.tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                let _ = s.evict.try_recv();
                !matches!(s.tx.try_send(frame), Err(TrySendError::Disconnected(_)))
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    pub fn get(&self) -> Option<SharedFrame> {
        lock(&self.latest).clone()
    }

    pub fn clear(&self) {
        *lock(&self.latest) = None;
    }

    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = channel::bounded(1);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.subscribers).push(Subscriber {
            id,
            tx,
            evict: rx.clone(),
        });
        Subscription {
            id,
            rx,
            cache: Arc::downgrade(self),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    fn unsubscribe(&self, id: u64) {
        lock(&self.subscribers).retain(|s| s.id != id);
    }
}

/// Live feed of new frames. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: Receiver<SharedFrame>,
    cache: Weak<FrameCache>,
}

impl Subscription {
    /// Next frame newer than the last one received, or `None` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<SharedFrame> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<SharedFrame> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.upgrade() {
            cache.unsubscribe(self.id);
        }
    }
}
