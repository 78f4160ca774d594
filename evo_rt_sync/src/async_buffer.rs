//! Double buffer for publishing RT state to non-RT readers.
//!
//! The RT writer owns a back buffer it can mutate freely and publishes it
//! with [`AsyncBuffer::try_commit`], which swaps it with the front buffer
//! only if no reader currently holds the lock. Readers clone the front buffer
//! under a plain mutex and never see the RT thread's working copy.

use parking_lot::Mutex;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};

/// Front buffer shared between one RT writer and any number of readers.
#[derive(Debug, Default)]
pub struct AsyncBuffer<T> {
    front: Mutex<T>,
    version: AtomicU64,
}

impl<T: Clone> AsyncBuffer<T> {
    /// Buffer whose front starts as `initial`.
    pub fn new(initial: T) -> Self {
        Self {
            front: Mutex::new(initial),
            version: AtomicU64::new(0),
        }
    }

    /// Swap `back` into the front without blocking.
    ///
    /// On success `back` holds the previous front and `true` is returned.
    /// Returns `false`, leaving `back` untouched, if a reader holds the
    /// lock; the caller retries next cycle.
    pub fn try_commit(&self, back: &mut T) -> bool {
        match self.front.try_lock() {
            Some(mut front) => {
                mem::swap(&mut *front, back);
                self.version.fetch_add(1, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Blocking commit for non-RT writers.
    pub fn commit(&self, back: &mut T) {
        mem::swap(&mut *self.front.lock(), back);
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Clone of the latest committed value.
    pub fn get(&self) -> T {
        self.front.lock().clone()
    }

    /// Number of successful commits.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_swaps_front_and_back() {
        let buffer = AsyncBuffer::new(1u32);
        let mut back = 2u32;
        assert!(buffer.try_commit(&mut back));
        assert_eq!(buffer.get(), 2);
        assert_eq!(back, 1);
        assert_eq!(buffer.version(), 1);
    }

    #[test]
    fn try_commit_fails_while_reader_holds_lock() {
        let buffer = AsyncBuffer::new(String::from("old"));
        let mut back = String::from("new");
        let guard = buffer.front.lock();
        assert!(!buffer.try_commit(&mut back));
        drop(guard);
        assert_eq!(back, "new");
        assert!(buffer.try_commit(&mut back));
        assert_eq!(buffer.get(), "new");
    }
}
