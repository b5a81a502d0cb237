//! Fixed-Size Single-Producer Single-Consumer Queue
//!
//! A classic ring buffer for passing commands into (and measurements out of)
//! the audio callback. Both sides are wait-free: one acquire load and one
//! release store per operation, no locks, no allocation after construction.
//!
//! The queue is split into a [`Producer`] and a [`Consumer`] so the single
//! producer / single consumer contract is enforced by ownership. The slot
//! array holds `next_power_of_two(requested)` slots and one slot always stays
//! empty to tell "full" from "empty", so the usable capacity is one less.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

struct Shared<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    /// Modified by the consumer only
    read_index: CachePadded<AtomicUsize>,
    /// Modified by the producer only
    write_index: CachePadded<AtomicUsize>,
}

// SAFETY: a slot is only ever accessed by the side that currently owns it,
// and ownership is handed over through the release/acquire index stores.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    #[inline]
    fn next_index(&self, index: usize) -> usize {
        (index + 1) & self.mask
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        if !std::mem::needs_drop::<T>() {
            return;
        }

        let end = *self.write_index.get_mut();
        let mut read = *self.read_index.get_mut();
        while read != end {
            // SAFETY: slots in [read, write) hold initialized elements
            unsafe { self.slots[read].get_mut().assume_init_drop() };
            read = self.next_index(read);
        }
    }
}

/// Constructor namespace for the split queue
pub struct FixedSpscQueue;

impl FixedSpscQueue {
    /// Create a queue with room for `next_power_of_two(buffer_size) - 1`
    /// elements (at least one).
    #[allow(clippy::new_ret_no_self)]
    pub fn new<T: Send>(buffer_size: usize) -> (Producer<T>, Consumer<T>) {
        let num_slots = buffer_size.next_power_of_two().max(2);
        let slots = (0..num_slots)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();

        let shared = Arc::new(Shared {
            slots,
            mask: num_slots - 1,
            read_index: CachePadded::new(AtomicUsize::new(0)),
            write_index: CachePadded::new(AtomicUsize::new(0)),
        });

        (
            Producer {
                shared: Arc::clone(&shared),
            },
            Consumer { shared },
        )
    }
}

/// Writing half of a [`FixedSpscQueue`]
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Producer<T> {
    /// Try to push `value` to the back of the queue.
    ///
    /// Returns the value back if the queue is full; the queue is unchanged.
    #[inline]
    pub fn try_push(&mut self, value: T) -> Result<(), T> {
        let shared = &*self.shared;
        let this_write = shared.write_index.load(Ordering::Relaxed);
        let next_write = shared.next_index(this_write);
        if next_write == shared.read_index.load(Ordering::Acquire) {
            return Err(value); // full
        }

        // SAFETY: the consumer never touches the slot at the write index
        unsafe { (*shared.slots[this_write].get()).write(value) };
        shared.write_index.store(next_write, Ordering::Release);
        Ok(())
    }

    /// Number of elements the queue can hold at once
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.mask
    }
}

/// Reading half of a [`FixedSpscQueue`]
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Consumer<T> {
    #[inline]
    fn front_index(&self) -> Option<usize> {
        let shared = &*self.shared;
        let this_read = shared.read_index.load(Ordering::Relaxed);
        if this_read == shared.write_index.load(Ordering::Acquire) {
            None // empty
        } else {
            Some(this_read)
        }
    }

    /// The element at the front of the queue, if any
    #[inline]
    pub fn front(&self) -> Option<&T> {
        let index = self.front_index()?;
        // SAFETY: the slot is initialized and the producer will not reuse it
        // until the read index moves past it, which needs `&mut self`.
        Some(unsafe { (*self.shared.slots[index].get()).assume_init_ref() })
    }

    /// Mutable access to the front element for in-place updates
    #[inline]
    pub fn front_mut(&mut self) -> Option<&mut T> {
        let index = self.front_index()?;
        // SAFETY: as for `front`, with unique access through `&mut self`
        Some(unsafe { (*self.shared.slots[index].get()).assume_init_mut() })
    }

    /// Drop the front element. Returns false if the queue was empty.
    #[inline]
    pub fn pop_front(&mut self) -> bool {
        let Some(this_read) = self.front_index() else {
            return false;
        };

        let shared = &*self.shared;
        // SAFETY: initialized slot owned by the consumer until published
        unsafe { (*shared.slots[this_read].get()).assume_init_drop() };
        shared
            .read_index
            .store(shared.next_index(this_read), Ordering::Release);
        true
    }

    /// Move the front element out of the queue
    #[inline]
    pub fn try_pop(&mut self) -> Option<T> {
        let this_read = self.front_index()?;

        let shared = &*self.shared;
        // SAFETY: initialized slot owned by the consumer until published
        let value = unsafe { (*shared.slots[this_read].get()).assume_init_read() };
        shared
            .read_index
            .store(shared.next_index(this_read), Ordering::Release);
        Some(value)
    }

    /// Pop every pending element into `handler`
    pub fn drain<F>(&mut self, mut handler: F)
    where
        F: FnMut(T),
    {
        while let Some(value) = self.try_pop() {
            handler(value);
        }
    }

    /// Whether the queue currently holds no elements.
    ///
    /// Prefer `front()`/`try_pop()` over checking this first.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.front_index().is_none()
    }

    /// Number of elements the queue can hold at once
    #[inline]
    pub fn capacity(&self) -> usize {
        self.shared.mask
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("capacity", &self.capacity())
            .finish()
    }
}
