//! Bounded report history with oldest-overwrite

use std::collections::VecDeque;

use crate::config::MAX_QUEUE_DEPTH;
use crate::error::{DriverError, Result};

/// Fixed-capacity FIFO of reports
///
/// [`force`](ReportQueue::force) never fails: when full, the oldest entry is
/// dropped to make room.
#[derive(Debug, Clone)]
pub struct ReportQueue<T> {
    items: VecDeque<T>,
    capacity: usize,
    overwritten: u64,
}

impl<T> ReportQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_QUEUE_DEPTH);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            overwritten: 0,
        }
    }

    /// Push, evicting the oldest report if the queue is full
    pub fn force(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
            self.overwritten += 1;
        }
        self.items.push_back(item);
    }

    /// Pop the oldest report
    pub fn get(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Discard all unread reports
    pub fn flush(&mut self) {
        self.items.clear();
    }

    /// Change capacity to `depth` (1-100); contents are discarded
    pub fn resize(&mut self, depth: usize) -> Result<()> {
        if depth < 1 || depth > MAX_QUEUE_DEPTH {
            return Err(DriverError::InvalidArgument(format!(
                "Queue depth must be 1-{}, got {}",
                MAX_QUEUE_DEPTH, depth
            )));
        }
        self.items = VecDeque::with_capacity(depth);
        self.capacity = depth;
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Reports lost to overwrite since creation
    pub fn overwritten(&self) -> u64 {
        self.overwritten
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_overwrites_oldest() {
        let mut queue = ReportQueue::new(2);
        queue.force(1);
        queue.force(2);
        queue.force(3);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.overwritten(), 1);
        assert_eq!(queue.get(), Some(2));
        assert_eq!(queue.get(), Some(3));
        assert_eq!(queue.get(), None);
    }

    #[test]
    fn test_resize_bounds() {
        let mut queue: ReportQueue<u8> = ReportQueue::new(2);
        assert!(queue.resize(0).is_err());
        assert!(queue.resize(101).is_err());
        assert_eq!(queue.capacity(), 2);
        queue.resize(100).unwrap();
        assert_eq!(queue.capacity(), 100);
    }

    #[test]
    fn test_resize_discards_contents() {
        let mut queue = ReportQueue::new(4);
        queue.force(7);
        queue.resize(3).unwrap();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_flush() {
        let mut queue = ReportQueue::new(3);
        queue.force('a');
        queue.force('b');
        queue.flush();
        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), 3);
    }
}
