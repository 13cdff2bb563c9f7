use core::cell::UnsafeCell;

use crate::{slot::Slot, threadlist::ThreadList, BlockReason, Kernel, ThreadState};

/// A reusable rendezvous point for a fixed number of threads.
///
/// Threads calling [`Barrier::wait()`] block until `count` threads have
/// called it. Then all of them are released and the barrier is reset for the
/// next cycle.
pub struct Barrier {
    state: UnsafeCell<BarrierState>,
}

struct BarrierState {
    count: u32,
    remaining: u32,
    waiters: ThreadList,
}

// SAFETY: the state is only accessed inside critical sections.
unsafe impl Sync for Barrier {}

impl Barrier {
    /// Creates a [`Barrier`] for `count` threads.
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero.
    #[must_use]
    pub const fn new(count: u32) -> Self {
        assert!(count > 0, "barrier needs at least one thread");
        Self {
            state: UnsafeCell::new(BarrierState {
                count,
                remaining: count,
                waiters: ThreadList::new(),
            }),
        }
    }

    /// Blocks until all threads of this cycle have arrived.
    ///
    /// Returns `true` for exactly one thread per cycle, the one that arrived
    /// last.
    ///
    /// # Panics
    ///
    /// Panics if it would block outside of a thread context.
    pub fn wait(&self, kernel: &Kernel) -> bool {
        // Filled by the thread that completes the cycle.
        let released: Slot<()> = Slot::empty();
        let mut arrived = false;
        loop {
            let leader = kernel.with_cs(|cs| {
                // SAFETY: access to the state only happens in critical sections, so it's always unique.
                let state = unsafe { &mut *self.state.get() };
                if released.take().is_some() {
                    return Some(false);
                }
                if !arrived {
                    arrived = true;
                    state.remaining -= 1;
                    if state.remaining == 0 {
                        let mut min_prio = None;
                        while let Some(waiter) = state.waiters.pop_with(kernel, cs, |waiter| {
                            let Some(wait_data) = waiter.wait_data else {
                                unreachable!("barrier waiter without a slot")
                            };
                            // SAFETY: waiters block with a `Slot<()>` on their
                            // stack and are still blocked.
                            unsafe { Slot::<()>::from_wait_data(wait_data) }.fill(());
                        }) {
                            // Popped by priority, so the first is the most urgent.
                            min_prio.get_or_insert(waiter.prio);
                        }
                        state.remaining = state.count;
                        if let Some(prio) = min_prio {
                            kernel.sched_switch_cs(cs, prio);
                        }
                        return Some(true);
                    }
                }
                state.waiters.put_current(
                    kernel,
                    cs,
                    ThreadState::Blocked(BlockReason::Barrier),
                    Some(released.as_wait_data()),
                );
                None
            });
            if let Some(leader) = leader {
                return leader;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::{
        test_utils::{kernel, leak, stack},
        ThreadId,
    };

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Arrive(ThreadId, u32),
        Leave(ThreadId, u32, bool),
    }

    struct Ctx {
        kernel: &'static Kernel,
        barrier: Barrier,
        events: StdMutex<Vec<Event>>,
    }

    fn two_cycles(ctx: &'static Ctx) {
        let pid = ctx.kernel.current_pid().unwrap();
        for cycle in 0..2 {
            ctx.events.lock().unwrap().push(Event::Arrive(pid, cycle));
            let leader = ctx.barrier.wait(ctx.kernel);
            ctx.events.lock().unwrap().push(Event::Leave(pid, cycle, leader));
        }
    }

    #[test]
    fn rendezvous_over_two_cycles() {
        let ctx = leak(Ctx {
            kernel: kernel(),
            barrier: Barrier::new(3),
            events: StdMutex::new(Vec::new()),
        });
        let pids = [
            ctx.kernel.thread_create(two_cycles, ctx, stack(), 3).unwrap(),
            ctx.kernel.thread_create(two_cycles, ctx, stack(), 1).unwrap(),
            ctx.kernel.thread_create(two_cycles, ctx, stack(), 2).unwrap(),
        ];

        ctx.kernel.run();

        let events = ctx.events.lock().unwrap().clone();
        assert_eq!(events.len(), 12);
        for cycle in 0..2 {
            let last_arrival = events
                .iter()
                .rposition(|e| matches!(e, Event::Arrive(_, c) if *c == cycle))
                .unwrap();
            let first_leave = events
                .iter()
                .position(|e| matches!(e, Event::Leave(_, c, _) if *c == cycle))
                .unwrap();
            // nobody leaves before everyone arrived
            assert!(last_arrival < first_leave);

            let leaders: Vec<ThreadId> = events
                .iter()
                .filter_map(|e| match e {
                    Event::Leave(pid, c, true) if *c == cycle => Some(*pid),
                    _ => None,
                })
                .collect();
            assert_eq!(leaders.len(), 1);
            for pid in pids {
                assert!(events.contains(&Event::Leave(pid, cycle, leaders[0] == pid)));
            }
        }
        for pid in pids {
            assert!(!ctx.kernel.is_valid_pid(pid));
        }
    }

    #[test]
    fn released_by_priority() {
        let ctx = leak(Ctx {
            kernel: kernel(),
            barrier: Barrier::new(3),
            events: StdMutex::new(Vec::new()),
        });
        // arrival order: high, mid, low (last one leads)
        let low = ctx.kernel.thread_create(two_cycles, ctx, stack(), 5).unwrap();
        let high = ctx.kernel.thread_create(two_cycles, ctx, stack(), 1).unwrap();
        let mid = ctx.kernel.thread_create(two_cycles, ctx, stack(), 3).unwrap();

        ctx.kernel.run();

        let events = ctx.events.lock().unwrap().clone();
        assert_eq!(
            &events[..6],
            [
                Event::Arrive(high, 0),
                Event::Arrive(mid, 0),
                Event::Arrive(low, 0),
                // the most urgent released thread preempts the leader
                Event::Leave(high, 0, false),
                Event::Arrive(high, 1),
                Event::Leave(mid, 0, false),
            ]
        );
    }

    #[test]
    fn single_thread_never_blocks() {
        let kernel = kernel();
        let barrier = Barrier::new(1);
        // usable outside of threads as nobody waits
        assert!(barrier.wait(kernel));
        assert!(barrier.wait(kernel));
    }

    #[test]
    #[should_panic(expected = "barrier needs at least one thread")]
    fn zero_count_panics() {
        let _ = Barrier::new(0);
    }
}
