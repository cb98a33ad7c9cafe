//! Fixed-capacity FIFO shared between the capture driver and one worker.
//!
//! Insertion into a full queue fails immediately and hands the item back, so
//! the caller decides whether that is a drop. Removal from an empty queue
//! returns `None`. Blocking variants wait on a condition variable for at most
//! the given timeout instead of spinning, and the lock is never held while the
//! caller does I/O with the item.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Bounded, mutex-guarded FIFO with condition-signal waits.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items.
    ///
    /// Returns `None` if `capacity` is zero or the slots cannot be reserved.
    pub fn new(capacity: usize) -> Option<Self> {
        if capacity == 0 {
            return None;
        }
        let mut items = VecDeque::new();
        items.try_reserve_exact(capacity).ok()?;
        Some(Self {
            items: Mutex::new(items),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        })
    }

    /// Maximum number of items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of items.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// True if no items are queued.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Append without blocking. A full queue returns the item as `Err`.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(item);
        }
        items.push_back(item);
        drop(items);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Append, waiting up to `timeout` for a free slot.
    pub fn push_timeout(&self, item: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        while items.len() >= self.capacity {
            if self.not_full.wait_until(&mut items, deadline).timed_out() {
                if items.len() >= self.capacity {
                    return Err(item);
                }
                break;
            }
        }
        items.push_back(item);
        drop(items);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let item = self.items.lock().pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Remove the oldest item, waiting up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock();
        while items.is_empty() {
            if self.not_empty.wait_until(&mut items, deadline).timed_out() {
                break;
            }
        }
        let item = items.pop_front();
        drop(items);
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Discard every queued item, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let removed = items.len();
        items.clear();
        drop(items);
        self.not_full.notify_all();
        removed
    }

    /// Wake every waiter so it can re-check cancellation.
    pub fn wake_all(&self) {
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(BoundedQueue::<u8>::new(0).is_none());
    }

    #[test]
    fn test_overflow_drops_exactly_the_excess() {
        let queue = BoundedQueue::new(4).unwrap();
        let mut dropped = 0;
        for i in 0..11 {
            if queue.try_push(i).is_err() {
                dropped += 1;
            }
        }
        assert_eq!(dropped, 7);
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_fifo_order() {
        let queue = BoundedQueue::new(3).unwrap();
        queue.try_push('a').unwrap();
        queue.try_push('b').unwrap();
        queue.try_push('c').unwrap();
        assert_eq!(queue.try_pop(), Some('a'));
        assert_eq!(queue.try_pop(), Some('b'));
        assert_eq!(queue.try_pop(), Some('c'));
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn test_full_queue_returns_item() {
        let queue = BoundedQueue::new(1).unwrap();
        queue.try_push(1).unwrap();
        assert_eq!(queue.try_push(2), Err(2));
        assert_eq!(
            queue.push_timeout(3, Duration::from_millis(10)),
            Err(3)
        );
    }

    #[test]
    fn test_pop_timeout_on_empty() {
        let queue = BoundedQueue::<u32>::new(2).unwrap();
        let start = Instant::now();
        assert_eq!(queue.pop_timeout(Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_push_timeout_succeeds_when_consumer_drains() {
        let queue = Arc::new(BoundedQueue::new(1).unwrap());
        queue.try_push(0).unwrap();

        let consumer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            consumer.try_pop()
        });

        assert!(queue.push_timeout(1, Duration::from_secs(5)).is_ok());
        assert_eq!(handle.join().unwrap(), Some(0));
        assert_eq!(queue.try_pop(), Some(1));
    }

    #[test]
    fn test_pop_timeout_wakes_on_push() {
        let queue = Arc::new(BoundedQueue::new(2).unwrap());
        let producer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.try_push(7).unwrap();
        });
        assert_eq!(queue.pop_timeout(Duration::from_secs(5)), Some(7));
        handle.join().unwrap();
    }

    #[test]
    fn test_clear() {
        let queue = BoundedQueue::new(4).unwrap();
        queue.try_push(1).unwrap();
        queue.try_push(2).unwrap();
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}
