//! Count-bounded buffers approximating a trailing time window.
//!
//! A buffer keeps the most recent `capacity` items and evicts the oldest
//! first. Capacity is chosen by the caller (e.g. `fps × seconds` for frames),
//! so the retained span only approximates a wall-clock duration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Upfront allocation; larger buffers grow on demand.
const INITIAL_CAPACITY: usize = 256;

/// Earliest timestamp still inside a trailing `window` ending now.
///
/// Windows too large to represent reach back to the beginning of time.
pub fn window_cutoff(window: std::time::Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|window| Utc::now().checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Anything that carries the time it was produced.
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

/// Summary of a buffer's current contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferStats {
    /// Number of items currently held
    pub count: usize,
    /// Maximum number of items retained
    pub capacity: usize,
    /// Timestamp of the oldest item, `None` when empty
    pub oldest: Option<DateTime<Utc>>,
    /// Timestamp of the newest item, `None` when empty
    pub newest: Option<DateTime<Utc>>,
    /// Seconds between oldest and newest (0 when empty)
    pub duration_secs: f64,
}

/// Thread-safe, append-only, FIFO-evicting buffer.
#[derive(Debug)]
pub struct TimeWindowBuffer<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
}

impl<T: Timestamped + Clone> TimeWindowBuffer<T> {
    /// Create a buffer holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(INITIAL_CAPACITY))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append an item, evicting the oldest one when full.
    pub fn append(&self, item: T) {
        let mut items = self.lock();
        if items.len() == self.capacity {
            items.pop_front();
        }
        items.push_back(item);
    }

    /// Copy of every item with `timestamp >= cutoff`, in insertion order.
    pub fn snapshot_since(&self, cutoff: DateTime<Utc>) -> Vec<T> {
        self.lock()
            .iter()
            .filter(|item| item.timestamp() >= cutoff)
            .cloned()
            .collect()
    }

    /// Copy of the whole buffer, in insertion order.
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().iter().cloned().collect()
    }

    /// The most recently appended item.
    pub fn latest(&self) -> Option<T> {
        self.lock().back().cloned()
    }

    /// Timestamp of the most recently appended item.
    pub fn newest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.lock().back().map(Timestamped::timestamp)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn stats(&self) -> BufferStats {
        let items = self.lock();
        let oldest = items.front().map(Timestamped::timestamp);
        let newest = items.back().map(Timestamped::timestamp);
        let duration_secs = match (oldest, newest) {
            (Some(o), Some(n)) => (n - o).num_milliseconds() as f64 / 1000.0,
            _ => 0.0,
        };

        BufferStats {
            count: items.len(),
            capacity: self.capacity,
            oldest,
            newest,
            duration_secs,
        }
    }

    // Every critical section leaves the deque consistent, so a poisoned lock
    // still guards valid data.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        at: DateTime<Utc>,
        id: usize,
    }

    impl Timestamped for Item {
        fn timestamp(&self) -> DateTime<Utc> {
            self.at
        }
    }

    fn items(base: DateTime<Utc>, n: usize) -> Vec<Item> {
        (0..n)
            .map(|id| Item {
                at: base + Duration::seconds(id as i64),
                id,
            })
            .collect()
    }

    #[test]
    fn test_keeps_most_recent_items() {
        let base = Utc::now();
        for (appends, capacity) in [(0, 3), (2, 3), (3, 3), (10, 3), (7, 1)] {
            let buffer = TimeWindowBuffer::new(capacity);
            for item in items(base, appends) {
                buffer.append(item);
            }

            let held: Vec<usize> = buffer.snapshot().into_iter().map(|i| i.id).collect();
            let expected: Vec<usize> = (appends.saturating_sub(capacity)..appends).collect();
            assert_eq!(buffer.len(), appends.min(capacity));
            assert_eq!(held, expected);
        }
    }

    #[test]
    fn test_huge_capacity_allocates_lazily() {
        let buffer = TimeWindowBuffer::new(usize::MAX);
        buffer.append(Item {
            at: Utc::now(),
            id: 0,
        });
        assert_eq!(buffer.capacity(), usize::MAX);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_snapshot_since_filters_by_cutoff() {
        let base = Utc::now();
        let buffer = TimeWindowBuffer::new(10);
        for item in items(base, 5) {
            buffer.append(item);
        }

        let ids = |cutoff| -> Vec<usize> {
            buffer
                .snapshot_since(cutoff)
                .into_iter()
                .map(|i| i.id)
                .collect()
        };

        assert_eq!(ids(base - Duration::seconds(1)), vec![0, 1, 2, 3, 4]);
        assert_eq!(ids(base + Duration::seconds(2)), vec![2, 3, 4]);
        assert!(ids(base + Duration::seconds(60)).is_empty());

        // Reading never consumes.
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn test_stats() {
        let buffer: TimeWindowBuffer<Item> = TimeWindowBuffer::new(4);
        let empty = buffer.stats();
        assert_eq!(empty.count, 0);
        assert_eq!(empty.oldest, None);
        assert_eq!(empty.newest, None);
        assert_eq!(empty.duration_secs, 0.0);

        let base = Utc::now();
        for item in items(base, 6) {
            buffer.append(item);
        }
        let stats = buffer.stats();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.capacity, 4);
        assert_eq!(stats.oldest, Some(base + Duration::seconds(2)));
        assert_eq!(stats.newest, Some(base + Duration::seconds(5)));
        assert_eq!(stats.duration_secs, 3.0);
        assert_eq!(buffer.latest().map(|i| i.id), Some(5));
    }

    #[test]
    fn test_window_cutoff() {
        let cutoff = window_cutoff(std::time::Duration::from_secs(30));
        let age = Utc::now() - cutoff;
        assert!(age >= Duration::seconds(30) && age < Duration::seconds(31));
        assert_eq!(
            window_cutoff(std::time::Duration::MAX),
            DateTime::<Utc>::MIN_UTC
        );
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buffer = TimeWindowBuffer::new(0);
        buffer.append(Item {
            at: Utc::now(),
            id: 1,
        });
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_concurrent_append_and_snapshot() {
        use std::sync::Arc;
        use std::thread;

        let buffer = Arc::new(TimeWindowBuffer::new(50));
        let base = Utc::now();

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..200 {
                        buffer.append(Item {
                            at: base + Duration::milliseconds(i),
                            id: w * 1000 + i as usize,
                        });
                    }
                })
            })
            .collect();

        for _ in 0..100 {
            assert!(buffer.snapshot_since(base).len() <= 50);
        }
        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(buffer.len(), 50);
    }
}
