//! Thread-safe bounded blocking queue for the producer/consumer pipeline.
//!
//! - Fixed capacity; `push` blocks while full, giving backpressure.
//! - `close` wakes every waiter; `pop` drains remaining items first.
//! - FIFO per producer; push/pop are O(1).

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use surge_core::error::{Result, UpscaleError};

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded MPMC queue with graceful shutdown.
pub struct BoundedQueue<T> {
    inner: Mutex<Inner<T>>,
    /// Signalled when space becomes available.
    not_full: Condvar,
    /// Signalled when an item becomes available.
    not_empty: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "BoundedQueue capacity must be > 0");
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Push an item, blocking while the queue is full.
    ///
    /// Fails with [`UpscaleError::QueueClosed`] once the queue is closed;
    /// the item is dropped.
    pub fn push(&self, item: T) -> Result<()> {
        let mut inner = self.inner.lock();
        self.not_full
            .wait_while(&mut inner, |inner| {
                inner.items.len() >= self.capacity && !inner.closed
            });
        if inner.closed {
            return Err(UpscaleError::QueueClosed);
        }
        inner.items.push_back(item);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pop an item, blocking while the queue is empty.
    ///
    /// Returns `None` only once the queue is closed **and** drained.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        self.not_empty
            .wait_while(&mut inner, |inner| inner.items.is_empty() && !inner.closed);
        let item = inner.items.pop_front()?;
        drop(inner);
        self.not_full.notify_one();
        Some(item)
    }

    /// Mark the queue closed and wake every waiter.  Idempotent.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            inner.closed = true;
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::BoundedQueue;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    #[should_panic(expected = "capacity must be > 0")]
    fn zero_capacity_is_rejected() {
        let _ = BoundedQueue::<u32>::new(0);
    }

    #[test]
    fn close_drains_then_reports_closed() {
        let q = BoundedQueue::new(4);
        q.push('a').unwrap();
        q.push('b').unwrap();
        q.close();
        assert_eq!(q.pop(), Some('a'));
        assert_eq!(q.pop(), Some('b'));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn push_after_close_fails() {
        let q = BoundedQueue::new(2);
        q.close();
        assert!(q.push(1).is_err());
        assert!(q.is_closed());
    }

    #[test]
    fn close_is_idempotent() {
        let q = BoundedQueue::<u32>::new(1);
        q.close();
        q.close();
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn close_wakes_blocked_consumers() {
        let q = Arc::new(BoundedQueue::<u32>::new(1));
        let waiter = {
            let q = q.clone();
            std::thread::spawn(move || q.pop())
        };
        // Give the consumer a moment to block on the empty queue.
        std::thread::sleep(Duration::from_millis(50));
        q.close();
        assert_eq!(waiter.join().unwrap(), None);
    }

    #[test]
    fn full_queue_blocks_producer_until_space() {
        let q = Arc::new(BoundedQueue::new(1));
        q.push(1u32).unwrap();
        let producer = {
            let q = q.clone();
            std::thread::spawn(move || q.push(2).is_ok())
        };
        std::thread::sleep(Duration::from_millis(50));
        // The producer is blocked; the queue still holds only item 1.
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop(), Some(1));
        assert!(producer.join().unwrap());
        assert_eq!(q.pop(), Some(2));
    }

    #[test]
    fn order_is_fifo() {
        let q = BoundedQueue::new(8);
        for i in 0..8 {
            q.push(i).unwrap();
        }
        q.close();
        let drained: Vec<_> = std::iter::from_fn(|| q.pop()).collect();
        assert_eq!(drained, (0..8).collect::<Vec<_>>());
    }
}
