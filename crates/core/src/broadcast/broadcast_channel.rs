use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

pub use crossbeam_channel::{RecvError, TryRecvError};

struct Slot<T> {
    tx: Sender<T>,
    /// Second handle on the subscriber's queue, used to evict the oldest item.
    evict: Receiver<T>,
    alive: Weak<()>,
}

struct Slots<T> {
    open: bool,
    slots: Vec<Slot<T>>,
}

/// Fan-out of one producer to any number of subscribers.
///
/// Every subscriber owns a bounded queue. When a queue is full the oldest
/// item is discarded to make room, so `publish` never blocks and a slow
/// consumer only ever loses stale items.
pub struct Broadcaster<T> {
    capacity: usize,
    inner: Mutex<Slots<T>>,
}

impl<T: Clone> Broadcaster<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Slots {
                open: true,
                slots: Vec::new(),
            }),
        }
    }

    #[cfg(test)]
    fn capacity(&self) -> usize {
        self.capacity
    }

    /// Registers a subscriber that sees every item published after this call.
    ///
    /// On a closed broadcaster the returned subscription is already finished.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = crossbeam_channel::bounded(self.capacity);
        let alive = Arc::new(());
        let mut inner = self.lock();
        if inner.open {
            inner.slots.push(Slot {
                tx,
                evict: rx.clone(),
                alive: Arc::downgrade(&alive),
            });
        }
        Subscription { rx, _alive: alive }
    }

    /// Delivers `item` to every live subscriber and returns how many got it.
    /// Dropped subscriptions are pruned here.
    pub fn publish(&self, item: T) -> usize {
        let mut inner = self.lock();
        inner.slots.retain(|slot| slot.alive.strong_count() > 0);
        for slot in &inner.slots {
            offer(slot, item.clone());
        }
        inner.slots.len()
    }

    /// Ends every subscription. Queued items stay readable; later publishes
    /// reach nobody.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.open = false;
        inner.slots.clear();
    }

    pub fn is_closed(&self) -> bool {
        !self.lock().open
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        let inner = self.lock();
        inner
            .slots
            .iter()
            .filter(|slot| slot.alive.strong_count() > 0)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, Slots<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn offer<T>(slot: &Slot<T>, mut item: T) {
    loop {
        match slot.tx.try_send(item) {
            Ok(()) => return,
            Err(TrySendError::Full(rejected)) => {
                let _ = slot.evict.try_recv();
                item = rejected;
            }
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}

/// Receiving end handed out by [`Broadcaster::subscribe`].
///
/// Dropping it unsubscribes.
pub struct Subscription<T> {
    rx: Receiver<T>,
    _alive: Arc<()>,
}

impl<T> Subscription<T> {
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.rx.try_recv()
    }

    /// Blocks until an item arrives or the broadcaster is closed and drained.
    pub fn recv(&self) -> Result<T, RecvError> {
        self.rx.recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Iterator for Subscription<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.rx.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain<T>(sub: &Subscription<T>) -> Vec<T> {
        std::iter::from_fn(|| sub.try_recv().ok()).collect()
    }

    #[test]
    fn test_publish_without_subscribers() {
        let broadcaster = Broadcaster::new(2);
        assert_eq!(broadcaster.publish(1), 0);
    }

    #[test]
    fn test_every_subscriber_gets_each_item() {
        let broadcaster = Broadcaster::new(4);
        let a = broadcaster.subscribe();
        let b = broadcaster.subscribe();
        assert_eq!(broadcaster.publish(1), 2);
        assert_eq!(broadcaster.publish(2), 2);
        assert_eq!(drain(&a), vec![1, 2]);
        assert_eq!(drain(&b), vec![1, 2]);
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let broadcaster = Broadcaster::new(2);
        let sub = broadcaster.subscribe();
        for i in 0..5 {
            broadcaster.publish(i);
        }
        assert_eq!(drain(&sub), vec![3, 4]);
    }

    #[test]
    fn test_slow_subscriber_does_not_hold_back_fast_one() {
        let broadcaster = Broadcaster::new(1);
        let slow = broadcaster.subscribe();
        let fast = broadcaster.subscribe();
        let mut seen = Vec::new();
        for i in 0..3 {
            broadcaster.publish(i);
            seen.extend(drain(&fast));
        }
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(drain(&slow), vec![2]);
    }

    #[test]
    fn test_late_subscriber_misses_earlier_items() {
        let broadcaster = Broadcaster::new(4);
        broadcaster.publish(1);
        let sub = broadcaster.subscribe();
        broadcaster.publish(2);
        assert_eq!(drain(&sub), vec![2]);
    }

    #[test]
    fn test_dropped_subscription_is_pruned_on_publish() {
        let broadcaster = Broadcaster::new(2);
        let keep = broadcaster.subscribe();
        let gone = broadcaster.subscribe();
        drop(gone);
        assert_eq!(broadcaster.subscriber_count(), 1);
        assert_eq!(broadcaster.publish(7), 1);
        assert_eq!(drain(&keep), vec![7]);
    }

    #[test]
    fn test_close_ends_subscriptions_after_draining() {
        let broadcaster = Broadcaster::new(4);
        let mut sub = broadcaster.subscribe();
        broadcaster.publish(1);
        broadcaster.close();
        assert_eq!(broadcaster.publish(2), 0);
        assert_eq!(sub.next(), Some(1));
        assert_eq!(sub.next(), None);
        assert_eq!(sub.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn test_subscribe_after_close_is_finished() {
        let broadcaster: Broadcaster<u8> = Broadcaster::new(4);
        broadcaster.close();
        let sub = broadcaster.subscribe();
        assert!(broadcaster.is_closed());
        assert_eq!(sub.try_recv(), Err(TryRecvError::Disconnected));
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let broadcaster = Broadcaster::new(0);
        let sub = broadcaster.subscribe();
        broadcaster.publish(1);
        broadcaster.publish(2);
        assert_eq!(broadcaster.capacity(), 1);
        assert_eq!(drain(&sub), vec![2]);
    }

    #[test]
    fn test_blocking_consumer_on_other_thread() {
        let broadcaster = Arc::new(Broadcaster::new(16));
        let sub = broadcaster.subscribe();
        let consumer = std::thread::spawn(move || sub.collect::<Vec<i32>>());
        for i in 0..10 {
            broadcaster.publish(i);
        }
        broadcaster.close();
        assert_eq!(consumer.join().unwrap(), (0..10).collect::<Vec<_>>());
    }
}
