//! The reader's fragment staging buffer.

use std::collections::VecDeque;
use strata_db_core::Fragment;

/// Bounded FIFO of fragments between the reader and its caller.
///
/// The bound is soft: the reader may push one batch past capacity to finish
/// an atomic emission (a row plus its tombstone transitions), the fill loop
/// checks fullness between iterations.
#[derive(Debug)]
pub struct FragmentBuffer {
    queue: VecDeque<Fragment>,
    capacity: usize,
}

impl FragmentBuffer {
    pub fn new(capacity: usize) -> Self {
        FragmentBuffer {
            queue: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, fragment: Fragment) {
        self.queue.push_back(fragment);
    }

    pub fn pop(&mut self) -> Option<Fragment> {
        self.queue.pop_front()
    }

    pub fn is_full(&self) -> bool {
        self.queue.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
