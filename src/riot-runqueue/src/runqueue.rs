// Disable indexing lints for now
#![allow(clippy::indexing_slicing)]

use self::clist::CList;

/// Runqueue number, equal to the priority of the threads it holds.
pub type RunqueueId = u16;
pub type ThreadId = u8;

/// Runqueue for `N_QUEUES` priorities, supporting `N_THREADS` total.
///
/// Assumptions:
/// - runqueue numbers (corresponding priorities) are 0..N_QUEUES (exclusive)
/// - *lower* runqueue number ([`RunqueueId`]) means higher priority
/// - runqueue numbers fit in usize bits
/// - [`ThreadId`]s range from 0..N_THREADS
/// - `N_THREADS` is <255 (as u8 is used to store them, but 0xFF is used as
///   special value)
///
/// The current implementation needs an usize for the bit cache,
/// a `[ThreadId; N_QUEUES]` array for the list tail indexes
/// and a `[ThreadId; N_THREADS]` array for the list next indexes.
pub struct RunQueue<const N_QUEUES: usize, const N_THREADS: usize> {
    /// Bitcache that represents the currently used queues
    /// in `0..N_QUEUES`.
    bitcache: usize,
    queues: CList<N_QUEUES, N_THREADS>,
}

impl<const N_QUEUES: usize, const N_THREADS: usize> RunQueue<N_QUEUES, N_THREADS> {
    const LIMITS_OK: () = {
        assert!(N_QUEUES <= usize::BITS as usize, "too many runqueues");
        assert!(N_THREADS < 0xFF, "too many threads");
    };

    #[allow(clippy::new_without_default)]
    pub const fn new() -> RunQueue<N_QUEUES, N_THREADS> {
        #[allow(clippy::let_unit_value)]
        let () = Self::LIMITS_OK;
        RunQueue {
            bitcache: 0,
            queues: CList::new(),
        }
    }

    /// Adds thread with pid `n` to the tail of runqueue number `rq`.
    ///
    /// Adding a thread that is already queued does nothing.
    pub fn add(&mut self, n: ThreadId, rq: RunqueueId) {
        debug_assert!((n as usize) < N_THREADS);
        debug_assert!((rq as usize) < N_QUEUES);
        self.bitcache |= 1 << rq;
        self.queues.push(n, rq);
    }

    /// Removes thread with pid `n` from runqueue number `rq`.
    ///
    /// `n` does not need to be the head of the queue. Removing a thread that
    /// is not queued does nothing.
    pub fn del(&mut self, n: ThreadId, rq: RunqueueId) {
        debug_assert!((n as usize) < N_THREADS);
        debug_assert!((rq as usize) < N_QUEUES);

        if self.queues.peek_head(rq) == Some(n) {
            let popped = self.queues.pop_head(rq);
            debug_assert_eq!(popped, Some(n));
        } else {
            self.queues.del(n, rq);
        }

        if self.queues.is_empty(rq) {
            self.bitcache &= !(1 << rq);
        }
    }

    /// Returns the pid that should run next.
    ///
    /// That is the head of the non-empty runqueue with the lowest number.
    pub fn get_next(&self) -> Option<ThreadId> {
        if self.bitcache == 0 {
            return None;
        }
        let rq = self.bitcache.trailing_zeros() as RunqueueId;
        self.queues.peek_head(rq)
    }

    /// Returns `true` if runqueue number `rq` holds no thread.
    pub fn is_empty(&self, rq: RunqueueId) -> bool {
        self.queues.is_empty(rq)
    }

    /// Advances runqueue number `rq`.
    ///
    /// This is used to "yield" to another thread of *the same* priority.
    pub fn advance(&mut self, rq: RunqueueId) {
        debug_assert!((rq as usize) < N_QUEUES);
        self.queues.advance(rq);
    }

    /// Advances from thread `n` in runqueue number `rq`.
    ///
    /// Compared to [`RunQueue::advance`], `n` does not need to be the head.
    /// A thread that is not the head is moved to the tail of the queue, which
    /// changes the order of the runqueue.
    pub fn advance_from(&mut self, n: ThreadId, rq: RunqueueId) {
        debug_assert!((rq as usize) < N_QUEUES);
        if Some(n) == self.queues.peek_head(rq) {
            self.queues.advance(rq);
        } else {
            self.queues.del(n, rq);
            self.queues.push(n, rq);
        }
    }
}

mod clist {
    //! This module implements an array of `N_QUEUES` circular linked lists over an
    //! array of size `N_THREADS`.
    //! The array is used for "next" pointers, so each integer value in the array
    //! corresponds to one element, which can only be in one of the lists.
    use super::{RunqueueId, ThreadId};

    #[derive(Debug, Copy, Clone)]
    pub struct CList<const N_QUEUES: usize, const N_THREADS: usize> {
        tail: [ThreadId; N_QUEUES],
        next_idxs: [ThreadId; N_THREADS],
    }

    impl<const N_QUEUES: usize, const N_THREADS: usize> CList<N_QUEUES, N_THREADS> {
        pub const fn new() -> Self {
            CList {
                tail: [Self::sentinel(); N_QUEUES],
                next_idxs: [Self::sentinel(); N_THREADS],
            }
        }

        pub const fn sentinel() -> ThreadId {
            0xFF
        }

        pub fn is_empty(&self, rq: RunqueueId) -> bool {
            self.tail[rq as usize] == Self::sentinel()
        }

        pub fn push(&mut self, n: ThreadId, rq: RunqueueId) {
            assert!(n < Self::sentinel());
            if self.next_idxs[n as usize] != Self::sentinel() {
                // already linked
                return;
            }
            let tail = self.tail[rq as usize];
            if tail == Self::sentinel() {
                // rq is empty, link both tail and n.next to n
                self.next_idxs[n as usize] = n;
            } else {
                // n.next = old head, old_tail.next = n
                self.next_idxs[n as usize] = self.next_idxs[tail as usize];
                self.next_idxs[tail as usize] = n;
            }
            self.tail[rq as usize] = n;
        }

        /// Deletes `n` from list `rq`, wherever it is.
        pub fn del(&mut self, n: ThreadId, rq: RunqueueId) {
            let next = self.next_idxs[n as usize];
            if next == Self::sentinel() {
                // not linked
                return;
            }

            if next == n {
                // `n` bites itself, so it is the only entry.
                debug_assert_eq!(self.tail[rq as usize], n);
                self.tail[rq as usize] = Self::sentinel();
            } else {
                // Every linked element has exactly one predecessor.
                let Some(prev) = self.next_idxs.iter().position(|next_idx| *next_idx == n) else {
                    unreachable!("list is circular")
                };
                self.next_idxs[prev] = next;
                if self.tail[rq as usize] == n {
                    self.tail[rq as usize] = prev as ThreadId;
                }
            }

            self.next_idxs[n as usize] = Self::sentinel();
        }

        pub fn pop_head(&mut self, rq: RunqueueId) -> Option<ThreadId> {
            let tail = self.tail[rq as usize];
            if tail == Self::sentinel() {
                return None;
            }
            let head = self.next_idxs[tail as usize];
            if head == tail {
                // only one entry, rq is now empty
                self.tail[rq as usize] = Self::sentinel();
            } else {
                self.next_idxs[tail as usize] = self.next_idxs[head as usize];
            }
            self.next_idxs[head as usize] = Self::sentinel();
            Some(head)
        }

        pub fn peek_head(&self, rq: RunqueueId) -> Option<ThreadId> {
            let tail = self.tail[rq as usize];
            if tail == Self::sentinel() {
                None
            } else {
                Some(self.next_idxs[tail as usize])
            }
        }

        pub fn advance(&mut self, rq: RunqueueId) {
            let tail = self.tail[rq as usize];
            if tail != Self::sentinel() {
                self.tail[rq as usize] = self.next_idxs[tail as usize];
            }
        }
    }

}
