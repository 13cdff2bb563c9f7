//! FIFO index queue over `0..capacity`, `capacity` being a power of two.
//!
//! `put()` marks the next index "used" and returns it.
//! `get()` returns the oldest used index (if any) and marks it unused.
//! `peek()` returns the index `get()` would return, without consuming it.
//!
//! All operations are O(1). The read and write counters run freely and wrap
//! at 256, which is a multiple of every supported capacity.

/// Largest supported capacity.
pub const MAX_CAPACITY: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingBufferIndex {
    reads: u8,
    writes: u8,
    capacity: u8,
}

impl RingBufferIndex {
    /// Creates an empty index queue.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two or exceeds [`MAX_CAPACITY`].
    pub const fn new(capacity: u8) -> Self {
        assert!(
            capacity.is_power_of_two() && capacity as usize <= MAX_CAPACITY,
            "ring buffer capacity must be a power of two in 1..=128"
        );
        Self {
            reads: 0,
            writes: 0,
            capacity,
        }
    }

    /// Number of used indexes, i.e. how often `get()` would succeed.
    pub const fn len(&self) -> u8 {
        self.writes.wrapping_sub(self.reads)
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    pub const fn capacity(&self) -> usize {
        self.capacity as usize
    }

    const fn mask(&self) -> u8 {
        self.capacity - 1
    }

    /// Returns the oldest used index (if any) and marks it unused.
    pub fn get(&mut self) -> Option<u8> {
        let pos = self.peek()?;
        self.reads = self.reads.wrapping_add(1);
        Some(pos)
    }

    /// Returns the oldest used index (if any).
    pub fn peek(&self) -> Option<u8> {
        if self.is_empty() {
            None
        } else {
            Some(self.reads & self.mask())
        }
    }

    /// Marks the next free index "used" (if any) and returns it.
    pub fn put(&mut self) -> Option<u8> {
        if self.is_full() {
            return None;
        }
        let pos = self.writes & self.mask();
        self.writes = self.writes.wrapping_add(1);
        Some(pos)
    }
}
