//! Deferred per-frame resets
//!
//! Dependents that need to rebuild themselves queue a reset instead of doing
//! it mid-frame. The engine drains the queue once at the start of every
//! render, before the pre-render event.

use std::cell::RefCell;
use std::rc::Rc;

/// Something that can rebuild its own state on request
pub trait Resettable {
    /// Rebuild
    fn reset(&mut self);
}

/// Shared handle to a resettable dependent
pub type SharedResettable = Rc<RefCell<dyn Resettable>>;

/// Queue of pending resets, deduplicated by identity
#[derive(Default)]
pub struct ResetQueue {
    pending: Vec<SharedResettable>,
}

impl ResetQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `target` for a reset
    ///
    /// Queuing the same object again before the next drain is a no-op.
    /// Returns whether the object was added.
    pub fn queue_reset(&mut self, target: SharedResettable) -> bool {
        let key = identity(&target);
        if self.pending.iter().any(|queued| identity(queued) == key) {
            return false;
        }
        self.pending.push(target);
        true
    }

    /// Number of queued objects
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Reset every queued object once, in queue order
    ///
    /// The queue is emptied before the first reset runs, so a reset that
    /// queues itself again lands in the next frame's batch. Returns how many
    /// objects were reset.
    pub fn drain(&mut self) -> usize {
        let batch = std::mem::take(&mut self.pending);
        let count = batch.len();
        for target in batch {
            target.borrow_mut().reset();
        }
        count
    }

    /// Drop everything still queued without resetting it
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

// Fat pointers to the same object can carry different vtables, so compare
// data addresses only.
fn identity(target: &SharedResettable) -> *const () {
    Rc::as_ptr(target).cast::<()>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Counter {
        resets: u32,
    }

    impl Resettable for Counter {
        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    #[test]
    fn test_duplicate_enqueue_resets_once() {
        let counter = Rc::new(RefCell::new(Counter::default()));
        let mut queue = ResetQueue::new();

        assert!(queue.queue_reset(counter.clone()));
        assert!(!queue.queue_reset(counter.clone()));
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.drain(), 1);
        assert_eq!(counter.borrow().resets, 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_distinct_objects_each_reset() {
        let first = Rc::new(RefCell::new(Counter::default()));
        let second = Rc::new(RefCell::new(Counter::default()));
        let mut queue = ResetQueue::new();

        queue.queue_reset(first.clone());
        queue.queue_reset(second.clone());
        assert_eq!(queue.drain(), 2);

        assert_eq!(first.borrow().resets, 1);
        assert_eq!(second.borrow().resets, 1);
    }

    #[test]
    fn test_requeue_after_drain() {
        let counter = Rc::new(RefCell::new(Counter::default()));
        let mut queue = ResetQueue::new();

        queue.queue_reset(counter.clone());
        queue.drain();
        assert!(queue.queue_reset(counter.clone()));
        queue.drain();

        assert_eq!(counter.borrow().resets, 2);
    }

    #[test]
    fn test_clear_drops_pending() {
        let counter = Rc::new(RefCell::new(Counter::default()));
        let mut queue = ResetQueue::new();
        queue.queue_reset(counter.clone());
        queue.clear();

        assert_eq!(queue.drain(), 0);
        assert_eq!(counter.borrow().resets, 0);
    }
}
