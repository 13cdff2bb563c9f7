#![cfg_attr(not(test), no_std)]

//! Typed FIFO ring buffer with inline storage, supporting single element
//! put/get/peek.
//!
//! The capacity is a const generic, so a buffer needs no separate backing
//! array and can be created in a `const` context.

use core::mem::MaybeUninit;

mod index;

pub use index::{RingBufferIndex, MAX_CAPACITY};

pub struct RingBuffer<T: Copy, const N: usize> {
    index: RingBufferIndex,
    slots: [MaybeUninit<T>; N],
}

impl<T: Copy, const N: usize> RingBuffer<T, N> {
    const CAPACITY_OK: () = assert!(
        N.is_power_of_two() && N <= MAX_CAPACITY,
        "ring buffer capacity must be a power of two in 1..=128"
    );

    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_OK;
        Self {
            index: RingBufferIndex::new(N as u8),
            slots: [const { MaybeUninit::uninit() }; N],
        }
    }

    /// Appends `element`.
    ///
    /// Returns `false` (and drops nothing, `T` is `Copy`) if the buffer is full.
    pub fn put(&mut self, element: T) -> bool {
        let Some(pos) = self.index.put() else {
            return false;
        };
        match self.slots.get_mut(usize::from(pos)) {
            Some(slot) => {
                slot.write(element);
                true
            }
            None => unreachable!(),
        }
    }

    /// Removes and returns the oldest element.
    pub fn get(&mut self) -> Option<T> {
        let pos = self.index.get()?;
        // SAFETY: the index only hands out positions that were written by `put()`.
        self.slots
            .get(usize::from(pos))
            .map(|slot| unsafe { slot.assume_init() })
    }

    /// Returns the oldest element without removing it.
    pub fn peek(&self) -> Option<T> {
        let pos = self.index.peek()?;
        // SAFETY: see `get()`.
        self.slots
            .get(usize::from(pos))
            .map(|slot| unsafe { slot.assume_init() })
    }

    /// Number of stored elements.
    pub fn len(&self) -> usize {
        usize::from(self.index.len())
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn is_full(&self) -> bool {
        self.index.is_full()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

impl<T: Copy, const N: usize> Default for RingBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + core::fmt::Debug, const N: usize> core::fmt::Debug for RingBuffer<T, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("len", &self.len())
            .field("capacity", &N)
            .field("head", &self.peek())
            .finish()
    }
}
