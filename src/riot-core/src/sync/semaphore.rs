use core::cell::UnsafeCell;

use crate::{threadlist::ThreadList, BlockReason, Kernel, ThreadState};

/// A counting semaphore.
///
/// Each [`Semaphore::post()`] wakes at most one waiter, the most urgent one.
pub struct Semaphore {
    state: UnsafeCell<SemaphoreState>,
}

struct SemaphoreState {
    value: u32,
    waiters: ThreadList,
}

/// The value of a [`Semaphore`] would exceed `u32::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SemaphoreOverflow;

impl core::fmt::Display for SemaphoreOverflow {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("semaphore overflow")
    }
}

// SAFETY: the state is only accessed inside critical sections.
unsafe impl Sync for Semaphore {}

impl Semaphore {
    /// Creates a [`Semaphore`] with an initial `value`.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self {
            state: UnsafeCell::new(SemaphoreState {
                value,
                waiters: ThreadList::new(),
            }),
        }
    }

    /// Decrements the value, blocking while it is zero.
    ///
    /// # Panics
    ///
    /// Panics if it would block outside of a thread context.
    pub fn wait(&self, kernel: &Kernel) {
        loop {
            let acquired = kernel.with_cs(|cs| {
                // SAFETY: access to the state only happens in critical sections, so it's always unique.
                let state = unsafe { &mut *self.state.get() };
                if state.value > 0 {
                    state.value -= 1;
                    return true;
                }
                state.waiters.put_current(
                    kernel,
                    cs,
                    ThreadState::Blocked(BlockReason::Semaphore),
                    None,
                );
                false
            });
            if acquired {
                return;
            }
            // Woken by `post()`, but the unit may be gone already.
        }
    }

    /// Decrements the value if it is not zero.
    ///
    /// Returns `false` if the value was zero.
    pub fn try_wait(&self, kernel: &Kernel) -> bool {
        kernel.with_cs(|_| {
            // SAFETY: access to the state only happens in critical sections, so it's always unique.
            let state = unsafe { &mut *self.state.get() };
            if state.value == 0 {
                return false;
            }
            state.value -= 1;
            true
        })
    }

    /// Increments the value and wakes the most urgent waiter, if any.
    ///
    /// Can be used from interrupt context.
    ///
    /// # Errors
    ///
    /// Returns [`SemaphoreOverflow`] and leaves the value untouched if it is
    /// `u32::MAX` already.
    pub fn post(&self, kernel: &Kernel) -> Result<(), SemaphoreOverflow> {
        kernel.with_cs(|cs| {
            // SAFETY: access to the state only happens in critical sections, so it's always unique.
            let state = unsafe { &mut *self.state.get() };
            state.value = state.value.checked_add(1).ok_or(SemaphoreOverflow)?;
            if let Some(waiter) = state.waiters.pop(kernel, cs) {
                kernel.sched_switch_cs(cs, waiter.prio);
            }
            Ok(())
        })
    }

    /// Current value.
    pub fn value(&self, kernel: &Kernel) -> u32 {
        kernel.with_cs(|_| {
            // SAFETY: access to the state only happens in critical sections, so it's always unique.
            unsafe { &*self.state.get() }.value
        })
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

    struct Ctx {
        kernel: &'static Kernel,
        sem: Semaphore,
        acquired: StdMutex<Vec<ThreadId>>,
    }

    impl Ctx {
        fn new(value: u32) -> &'static Self {
            leak(Self {
                kernel: kernel(),
                sem: Semaphore::new(value),
                acquired: StdMutex::new(Vec::new()),
            })
        }

        fn acquired(&self) -> Vec<ThreadId> {
            self.acquired.lock().unwrap().clone()
        }
    }

    fn acquire(ctx: &'static Ctx) {
        ctx.sem.wait(ctx.kernel);
        let pid = ctx.kernel.current_pid().unwrap();
        ctx.acquired.lock().unwrap().push(pid);
    }

    #[test]
    fn try_wait_and_overflow() {
        let ctx = Ctx::new(1);
        let (kernel, sem) = (ctx.kernel, &ctx.sem);
        assert!(sem.try_wait(kernel));
        assert!(!sem.try_wait(kernel));
        assert_eq!(sem.value(kernel), 0);

        sem.post(kernel).unwrap();
        sem.post(kernel).unwrap();
        assert_eq!(sem.value(kernel), 2);

        let full = Semaphore::new(u32::MAX);
        assert_eq!(full.post(kernel), Err(SemaphoreOverflow));
        assert_eq!(full.value(kernel), u32::MAX);
    }

    #[test]
    fn wait_without_blocking() {
        let ctx = Ctx::new(2);
        let a = ctx.kernel.thread_create(acquire, ctx, stack(), 1).unwrap();
        let b = ctx.kernel.thread_create(acquire, ctx, stack(), 1).unwrap();
        ctx.kernel.run();
        assert_eq!(ctx.acquired(), [a, b]);
        assert_eq!(ctx.sem.value(ctx.kernel), 0);
    }

    fn post_once(ctx: &'static Ctx) {
        ctx.sem.post(ctx.kernel).unwrap();
    }

    #[test]
    fn post_hands_unit_to_waiter() {
        let ctx = Ctx::new(0);
        let waiter = ctx.kernel.thread_create(acquire, ctx, stack(), 1).unwrap();
        let poster = ctx.kernel.thread_create(post_once, ctx, stack(), 2).unwrap();

        ctx.kernel.run();
        assert_eq!(ctx.acquired(), [waiter]);
        // the posted unit went to the waiter
        assert_eq!(ctx.sem.value(ctx.kernel), 0);
        assert!(!ctx.kernel.is_valid_pid(poster));
    }

    #[test]
    fn one_post_wakes_one_waiter() {
        let ctx = Ctx::new(0);
        let low = ctx.kernel.thread_create(acquire, ctx, stack(), 4).unwrap();
        let high = ctx.kernel.thread_create(acquire, ctx, stack(), 1).unwrap();
        let mid = ctx.kernel.thread_create(acquire, ctx, stack(), 2).unwrap();
        ctx.kernel.run();
        for pid in [low, high, mid] {
            assert_eq!(
                ctx.kernel.get_state(pid),
                Some(ThreadState::Blocked(BlockReason::Semaphore))
            );
        }

        // "interrupt" posts
        ctx.sem.post(ctx.kernel).unwrap();
        assert_eq!(ctx.kernel.get_state(high), Some(ThreadState::Pending));
        assert_eq!(
            ctx.kernel.get_state(mid),
            Some(ThreadState::Blocked(BlockReason::Semaphore))
        );
        ctx.kernel.run();
        assert_eq!(ctx.acquired(), [high]);
        assert_eq!(ctx.sem.value(ctx.kernel), 0);

        ctx.sem.post(ctx.kernel).unwrap();
        ctx.sem.post(ctx.kernel).unwrap();
        ctx.kernel.run();
        assert_eq!(ctx.acquired(), [high, mid, low]);
        assert_eq!(ctx.sem.value(ctx.kernel), 0);
    }

    #[test]
    fn stolen_unit_makes_waiter_block_again() {
        let ctx = Ctx::new(0);
        let waiter = ctx.kernel.thread_create(acquire, ctx, stack(), 1).unwrap();
        ctx.kernel.run();

        ctx.sem.post(ctx.kernel).unwrap();
        // taken before the woken waiter got to run
        assert!(ctx.sem.try_wait(ctx.kernel));
        ctx.kernel.run();
        assert_eq!(
            ctx.kernel.get_state(waiter),
            Some(ThreadState::Blocked(BlockReason::Semaphore))
        );
        assert!(ctx.acquired().is_empty());

        ctx.sem.post(ctx.kernel).unwrap();
        ctx.kernel.run();
        assert_eq!(ctx.acquired(), [waiter]);
    }
}
