//! Bounded mailbox with direct hand-off to waiting readers.

use core::cell::UnsafeCell;

use ringbuffer::RingBuffer;

use crate::{slot::Slot, threadlist::ThreadList, BlockReason, Kernel, ThreadState};

/// A bounded multi-producer multi-consumer message queue.
///
/// Messages are buffered in a ring of `N` slots. A message put while a reader
/// waits bypasses the ring and is handed to that reader directly. Waiting
/// readers and writers are served by priority, FIFO within a priority.
///
/// At any time, readers only wait while the ring is empty, and writers only
/// wait while it is full.
///
/// `put` and `get` block; `try_put` and `try_get` may also be used from
/// interrupt context.
pub struct Mbox<T: Copy + Send, const N: usize> {
    state: UnsafeCell<MboxState<T, N>>,
}

struct MboxState<T: Copy, const N: usize> {
    ring: RingBuffer<T, N>,
    readers: ThreadList,
    writers: ThreadList,
}

// SAFETY: the state is only accessed inside critical sections.
unsafe impl<T: Copy + Send, const N: usize> Sync for Mbox<T, N> {}

impl<T: Copy + Send, const N: usize> Mbox<T, N> {
    /// Creates an empty [`Mbox`].
    ///
    /// `N` must be a power of two in `1..=128`, checked at compile time.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: UnsafeCell::new(MboxState {
                ring: RingBuffer::new(),
                readers: ThreadList::new(),
                writers: ThreadList::new(),
            }),
        }
    }

    /// Puts a message, blocking while the mailbox is full.
    ///
    /// # Panics
    ///
    /// Panics if it would block outside of a thread context.
    pub fn put(&self, kernel: &Kernel, msg: T) {
        let sent = self.send(kernel, msg, true);
        debug_assert!(sent);
    }

    /// Puts a message if that is possible without blocking.
    ///
    /// Returns `false` if the mailbox is full.
    pub fn try_put(&self, kernel: &Kernel, msg: T) -> bool {
        self.send(kernel, msg, false)
    }

    /// Gets a message, blocking while the mailbox is empty.
    ///
    /// # Panics
    ///
    /// Panics if it would block outside of a thread context.
    pub fn get(&self, kernel: &Kernel) -> T {
        match self.recv(kernel, true) {
            Some(msg) => msg,
            None => unreachable!("blocking get returned without a message"),
        }
    }

    /// Gets a message if one is available.
    pub fn try_get(&self, kernel: &Kernel) -> Option<T> {
        self.recv(kernel, false)
    }

    /// Capacity of the mailbox.
    pub const fn size(&self) -> usize {
        N
    }

    /// Number of buffered messages.
    pub fn avail(&self, kernel: &Kernel) -> usize {
        kernel.with_cs(|_| {
            // SAFETY: access to the state only happens in critical sections, so it's always unique.
            let state = unsafe { &*self.state.get() };
            state.ring.len()
        })
    }

    fn send(&self, kernel: &Kernel, msg: T, blocking: bool) -> bool {
        // Taken by the reader that frees a slot for us.
        let slot = Slot::with(msg);
        loop {
            let done = kernel.with_cs(|cs| {
                // SAFETY: access to the state only happens in critical sections, so it's always unique.
                let state = unsafe { &mut *self.state.get() };

                let reader = state.readers.pop_with(kernel, cs, |reader| {
                    let Some(wait_data) = reader.wait_data else {
                        unreachable!("reader blocked without a slot")
                    };
                    // SAFETY: readers block with a `Slot<T>` on their stack and
                    // are still blocked.
                    unsafe { Slot::<T>::from_wait_data(wait_data) }.fill(msg);
                });
                if let Some(reader) = reader {
                    debug_assert_eq!(
                        reader.old_state,
                        ThreadState::Blocked(BlockReason::Mailbox)
                    );
                    kernel.sched_switch_cs(cs, reader.prio);
                    return Some(true);
                }

                if state.ring.put(msg) {
                    return Some(true);
                }
                if !blocking {
                    return Some(false);
                }
                state.writers.put_current(
                    kernel,
                    cs,
                    ThreadState::Blocked(BlockReason::Mailbox),
                    Some(slot.as_wait_data()),
                );
                None
            });
            match done {
                Some(sent) => return sent,
                // The reader that woke us moved our message into the ring.
                None if !slot.is_filled() => return true,
                None => {}
            }
        }
    }

    fn recv(&self, kernel: &Kernel, blocking: bool) -> Option<T> {
        let slot = Slot::empty();
        let res = kernel.with_cs(|cs| {
            // SAFETY: access to the state only happens in critical sections, so it's always unique.
            let MboxState {
                ring,
                readers,
                writers,
            } = unsafe { &mut *self.state.get() };

            if let Some(msg) = ring.get() {
                // Refill the freed slot from the first waiting writer.
                let writer = writers.pop_with(kernel, cs, |writer| {
                    let Some(wait_data) = writer.wait_data else {
                        unreachable!("writer blocked without a slot")
                    };
                    // SAFETY: writers block with a `Slot<T>` on their stack and
                    // are still blocked.
                    let slot = unsafe { Slot::<T>::from_wait_data(wait_data) };
                    if let Some(pending) = slot.take() {
                        let stored = ring.put(pending);
                        debug_assert!(stored);
                    }
                });
                if let Some(writer) = writer {
                    kernel.sched_switch_cs(cs, writer.prio);
                }
                return Some(Some(msg));
            }

            if !blocking {
                return Some(None);
            }
            readers.put_current(
                kernel,
                cs,
                ThreadState::Blocked(BlockReason::Mailbox),
                Some(slot.as_wait_data()),
            );
            None
        });
        match res {
            Some(msg) => msg,
            None => {
                // Readers are only woken by a writer handing over its message.
                let Some(msg) = slot.take() else {
                    unreachable!("reader woken without a delivered message")
                };
                Some(msg)
            }
        }
    }

    #[cfg(test)]
    fn check_invariants(&self, kernel: &Kernel) {
        kernel.with_cs(|_| {
            // SAFETY: access to the state only happens in critical sections, so it's always unique.
            let state = unsafe { &*self.state.get() };
            assert!(state.ring.len() <= N);
            if !state.readers.is_empty() {
                assert!(state.ring.is_empty(), "readers wait on a non-empty mailbox");
            }
            if !state.writers.is_empty() {
                assert!(state.ring.is_full(), "writers wait on a non-full mailbox");
            }
        });
    }
}

impl<T: Copy + Send, const N: usize> Default for Mbox<T, N> {
    fn default() -> Self {
        Self::new()
    }
}
