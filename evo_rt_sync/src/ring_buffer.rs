//! Bounded single-producer / single-consumer ring buffer.
//!
//! All slots are allocated and default-initialized at construction. The
//! producer writes in place through an [`InsertSlot`] and publishes with
//! [`InsertSlot::finish_insert`]; the consumer reads in place through a
//! [`FrontSlot`]. Neither side blocks or allocates.
//!
//! The single-producer / single-consumer rule is enforced at run time: a
//! second concurrent `prepare_insert` (or `front`) returns `None` instead of
//! racing on the same slot.

use std::cell::UnsafeCell;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Fixed-capacity SPSC queue of `T`.
pub struct RingBuffer<T> {
    slots: Box<[UnsafeCell<T>]>,
    /// Total number of elements consumed.
    head: AtomicUsize,
    /// Total number of elements published.
    tail: AtomicUsize,
    producer_busy: AtomicBool,
    consumer_busy: AtomicBool,
}

// SAFETY: slot access is partitioned between exactly one producer and one
// consumer by the busy flags and the head/tail protocol; values of `T` move
// between threads, so `T: Send` is required.
unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

impl<T: Default> RingBuffer<T> {
    /// Allocate `capacity` default-initialized slots.
    ///
    /// # Panics
    ///
    /// If `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be non-zero");
        Self {
            slots: (0..capacity).map(|_| UnsafeCell::new(T::default())).collect(),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            producer_busy: AtomicBool::new(false),
            consumer_busy: AtomicBool::new(false),
        }
    }

    /// Push a whole value. Returns it back if the buffer is full or another
    /// producer holds the insert slot.
    pub fn push(&self, value: T) -> Result<(), T> {
        match self.prepare_insert() {
            Some(mut slot) => {
                *slot = value;
                slot.finish_insert();
                Ok(())
            }
            None => Err(value),
        }
    }

    /// Take the oldest value, leaving a default in its slot.
    pub fn pop(&self) -> Option<T> {
        self.front().map(FrontSlot::move_front)
    }

    /// Drop the oldest value.
    pub fn drop_front(&self) -> bool {
        self.front().map(FrontSlot::drop_front).is_some()
    }

    /// Drop everything currently queued.
    pub fn clear(&self) {
        while self.drop_front() {}
    }
}

impl<T> RingBuffer<T> {
    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of published, unconsumed elements. Never exceeds capacity.
    pub fn size(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        tail.saturating_sub(head).min(self.capacity())
    }

    /// Whether no element is queued.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Whether every slot holds an unconsumed element.
    pub fn is_full(&self) -> bool {
        self.size() == self.capacity()
    }

    /// Reserve the next free slot for writing. `None` if full.
    pub fn prepare_insert(&self) -> Option<InsertSlot<'_, T>> {
        if self.producer_busy.swap(true, Ordering::Acquire) {
            return None;
        }
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        if tail.wrapping_sub(head) >= self.capacity() {
            self.producer_busy.store(false, Ordering::Release);
            return None;
        }
        Some(InsertSlot {
            ring: self,
            position: tail,
        })
    }

    /// Borrow the oldest element. `None` if empty.
    pub fn front(&self) -> Option<FrontSlot<'_, T>> {
        if self.consumer_busy.swap(true, Ordering::Acquire) {
            return None;
        }
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        if tail == head {
            self.consumer_busy.store(false, Ordering::Release);
            return None;
        }
        Some(FrontSlot {
            ring: self,
            position: head,
        })
    }

    fn slot(&self, position: usize) -> *mut T {
        self.slots[position % self.capacity()].get()
    }
}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("size", &self.size())
            .finish()
    }
}

/// Exclusive access to the next free slot. Dropping it without
/// [`finish_insert`](Self::finish_insert) abandons the write.
pub struct InsertSlot<'a, T> {
    ring: &'a RingBuffer<T>,
    position: usize,
}

impl<T> InsertSlot<'_, T> {
    /// Publish the slot to the consumer.
    pub fn finish_insert(self) {
        self.ring
            .tail
            .store(self.position.wrapping_add(1), Ordering::Release);
    }
}

impl<T> Deref for InsertSlot<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the producer flag is held and the slot lies outside the
        // consumer's [head, tail) window, so nobody else touches it.
        unsafe { &*self.ring.slot(self.position) }
    }
}

impl<T> DerefMut for InsertSlot<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `deref`.
        unsafe { &mut *self.ring.slot(self.position) }
    }
}

impl<T> Drop for InsertSlot<'_, T> {
    fn drop(&mut self) {
        self.ring.producer_busy.store(false, Ordering::Release);
    }
}

/// Exclusive access to the oldest element. Dropping it without consuming
/// leaves the element queued.
pub struct FrontSlot<'a, T> {
    ring: &'a RingBuffer<T>,
    position: usize,
}

impl<T> FrontSlot<'_, T> {
    fn advance(&self) {
        self.ring
            .head
            .store(self.position.wrapping_add(1), Ordering::Release);
    }
}

impl<T: Default> FrontSlot<'_, T> {
    /// Consume the element, dropping it in place.
    pub fn drop_front(mut self) {
        drop(mem::take(&mut *self));
        self.advance();
    }

    /// Consume the element, moving it out.
    pub fn move_front(mut self) -> T {
        let value = mem::take(&mut *self);
        self.advance();
        value
    }
}

impl<T> Deref for FrontSlot<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the consumer flag is held and the slot is inside the
        // published [head, tail) window, which the producer never writes.
        unsafe { &*self.ring.slot(self.position) }
    }
}

impl<T> DerefMut for FrontSlot<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see `deref`.
        unsafe { &mut *self.ring.slot(self.position) }
    }
}

impl<T> Drop for FrontSlot<'_, T> {
    fn drop(&mut self) {
        self.ring.consumer_busy.store(false, Ordering::Release);
    }
}
