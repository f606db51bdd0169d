use std::{collections::VecDeque, fmt};

use parking_lot::Mutex;

/// A FIFO shared between threads. Every operation takes the queue's lock for its duration.
/// Nothing here waits for an element to arrive: [`ConcurrentQueue::extract_first`] returns
/// `None` on an empty queue.
///
/// The lock is a plain mutex so that the queue is `Sync` for any `T: Send`, boxed closures
/// included.
pub struct ConcurrentQueue<T> {
    elements: Mutex<VecDeque<T>>,
}

impl<T> Default for ConcurrentQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ConcurrentQueue<T> {
    /// Returns an empty queue.
    pub fn new() -> Self {
        Self {
            elements: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends `element` at the back.
    pub fn push(&self, element: T) {
        self.elements.lock().push_back(element)
    }

    /// Pops the front element, or returns `None` if the queue is empty.
    pub fn extract_first(&self) -> Option<T> {
        self.elements.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.elements.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.lock().is_empty()
    }

    /// Drops every queued element and returns how many there were.
    pub fn clear(&self) -> usize {
        let drained: Vec<T> = self.elements.lock().drain(..).collect();
        // Elements are dropped here, after the lock is released: their destructors may
        // touch other shared state.
        drained.len()
    }
}

impl<T> fmt::Debug for ConcurrentQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentQueue")
            .field("len", &self.elements.lock().len())
            .finish()
    }
}
