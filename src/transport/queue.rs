//! Bounded outbound queue with drop-oldest overflow.

use std::collections::VecDeque;

/// FIFO of encoded frames waiting for a connection.
#[derive(Debug)]
pub struct OutboundQueue {
    items: VecDeque<String>,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a frame. At capacity the oldest frame is evicted and returned.
    pub fn push_back(&mut self, frame: String) -> Option<String> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(frame);
        evicted
    }

    /// Put a frame that failed to send back at the head.
    ///
    /// If newer frames filled the queue meanwhile, this frame is the oldest
    /// and is the one dropped; returns `false` in that case.
    pub fn push_front(&mut self, frame: String) -> bool {
        if self.items.len() >= self.capacity {
            return false;
        }
        self.items.push_front(frame);
        true
    }

    pub fn pop_front(&mut self) -> Option<String> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.items.iter()
    }
}
