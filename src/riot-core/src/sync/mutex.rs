use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};

use critical_section::CriticalSection;

use crate::{threadlist::ThreadList, BlockReason, Kernel, RunqueueId, ThreadId, ThreadState};

/// A basic mutex with priority inheritance.
pub struct Mutex<T> {
    state: UnsafeCell<LockState>,
    inner: UnsafeCell<T>,
}

/// State of a [`Mutex`].
enum LockState {
    Unlocked,
    Locked {
        /// The current owner of the lock.
        owner_id: ThreadId,
        /// Priority this mutex lends to the owner, the one of its most urgent waiter.
        lent: Option<RunqueueId>,
        /// Waiters for the mutex.
        waiters: ThreadList,
    },
}

impl LockState {
    /// Returns a [`LockState::Locked`] with the current thread as the owner
    /// and an empty waitlist.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a thread context.
    fn locked_with_current(kernel: &Kernel, cs: CriticalSection) -> Self {
        let owner_id = kernel
            .scheduler
            .with_cs(cs, |scheduler| scheduler.current_pid())
            .expect("Function should be called inside a thread context.");
        LockState::Locked {
            waiters: ThreadList::new(),
            owner_id,
            lent: None,
        }
    }
}

impl<T> Mutex<T> {
    /// Creates a new **unlocked** [`Mutex`].
    pub const fn new(value: T) -> Self {
        Self {
            state: UnsafeCell::new(LockState::Unlocked),
            inner: UnsafeCell::new(value),
        }
    }

    /// Returns whether the mutex is locked.
    pub fn is_locked(&self, kernel: &Kernel) -> bool {
        kernel.with_cs(|_| {
            // SAFETY: access to the state only happens in critical sections, so it's always unique.
            let state = unsafe { &*self.state.get() };
            !matches!(state, LockState::Unlocked)
        })
    }

    /// Acquires a mutex, blocking the current thread until it is able to do so.
    ///
    /// If the mutex was unlocked, it will be locked and a [`MutexGuard`] is returned.
    /// If the mutex is locked, this function will block the current thread until the mutex gets
    /// unlocked elsewhere.
    ///
    /// If the current owner of the mutex is less urgent than the current thread, it inherits
    /// the waiting thread's priority until it releases this mutex.
    /// Priorities inherited through other mutexes the owner holds are kept.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a thread context.
    pub fn lock<'a>(&'a self, kernel: &'a Kernel) -> MutexGuard<'a, T> {
        kernel.with_cs(|cs| {
            // SAFETY: access to the state only happens in critical sections, so it's always unique.
            let state = unsafe { &mut *self.state.get() };
            match state {
                LockState::Unlocked => {
                    *state = LockState::locked_with_current(kernel, cs);
                }
                LockState::Locked {
                    waiters,
                    owner_id,
                    lent,
                } => {
                    // Insert thread in waitlist, which also triggers the scheduler.
                    let (_, waiter_prio) = waiters.put_current(
                        kernel,
                        cs,
                        ThreadState::Blocked(BlockReason::Mutex),
                        None,
                    );
                    // Current mutex owner inherits the priority.
                    let lend = lent.map_or(waiter_prio, |prio| prio.min(waiter_prio));
                    kernel.lend_priority_cs(cs, *owner_id, *lent, Some(lend));
                    *lent = Some(lend);
                    // Context switch happens here as soon as we leave the critical section.
                }
            }
        });
        // Mutex was either directly acquired because it was unlocked, or the current thread was entered
        // to the waitlist. In the latter case, it only continues running here after it was popped again
        // from the waitlist and the thread acquired the mutex.

        MutexGuard {
            kernel,
            mutex: self,
        }
    }

    /// Attempts to acquire this lock, in a non-blocking fashion.
    ///
    /// If the mutex was unlocked, it will be locked and a [`MutexGuard`] is returned.
    /// If the mutex was locked `None` is returned.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a thread context.
    pub fn try_lock<'a>(&'a self, kernel: &'a Kernel) -> Option<MutexGuard<'a, T>> {
        kernel.with_cs(|cs| {
            // SAFETY: access to the state only happens in critical sections, so it's always unique.
            let state = unsafe { &mut *self.state.get() };
            if let LockState::Unlocked = *state {
                *state = LockState::locked_with_current(kernel, cs);
                Some(MutexGuard {
                    kernel,
                    mutex: self,
                })
            } else {
                None
            }
        })
    }

    /// Releases the mutex.
    ///
    /// If there are waiters, the first waiter will be woken up.
    fn release(&self, kernel: &Kernel) {
        kernel.with_cs(|cs| {
            // SAFETY: access to the state only happens in critical sections, so it's always unique.
            let state = unsafe { &mut *self.state.get() };
            if let LockState::Locked {
                waiters,
                owner_id,
                lent,
            } = state
            {
                // Only take back what this mutex lent.
                kernel.lend_priority_cs(cs, *owner_id, lent.take(), None);
                // Pop next thread from waitlist so that it can acquire the mutex.
                if let Some(waiter) = waiters.pop(kernel, cs) {
                    *owner_id = waiter.pid;
                    // The remaining waiters lend to the new owner.
                    *lent = waiters.head_prio(kernel, cs);
                    kernel.lend_priority_cs(cs, waiter.pid, None, *lent);
                    kernel.sched_switch_cs(cs, waiter.prio);
                } else {
                    // Unlock if waitlist was empty.
                    *state = LockState::Unlocked;
                }
            }
        });
    }
}

// SAFETY: the state is only accessed inside critical sections, the value only
// by the lock owner.
unsafe impl<T: Send> Sync for Mutex<T> {}

/// Grants access to the [`Mutex`] inner data.
///
/// Dropping the [`MutexGuard`] will unlock the [`Mutex`];
pub struct MutexGuard<'a, T> {
    kernel: &'a Kernel,
    mutex: &'a Mutex<T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: MutexGuard always has unique access.
        unsafe { &*self.mutex.inner.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: MutexGuard always has unique access.
        unsafe { &mut *self.mutex.inner.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        // Unlock the mutex when the guard is dropped.
        self.mutex.release(self.kernel);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::test_utils::{kernel, leak, stack};

    struct Ctx {
        kernel: &'static Kernel,
        mutex: Mutex<Vec<ThreadId>>,
        other: Mutex<()>,
        events: StdMutex<Vec<(&'static str, ThreadId)>>,
    }

    impl Ctx {
        fn new() -> &'static Self {
            leak(Self {
                kernel: kernel(),
                mutex: Mutex::new(Vec::new()),
                other: Mutex::new(()),
                events: StdMutex::new(Vec::new()),
            })
        }

        fn record(&self, event: &'static str) {
            let pid = self.kernel.current_pid().unwrap();
            self.events.lock().unwrap().push((event, pid));
        }

        fn events(&self) -> Vec<(&'static str, ThreadId)> {
            self.events.lock().unwrap().clone()
        }
    }

    fn push_yielding(ctx: &'static Ctx) {
        let pid = ctx.kernel.current_pid().unwrap();
        for _ in 0..2 {
            let mut guard = ctx.mutex.lock(ctx.kernel);
            guard.push(pid);
            // the other thread must not get in while we hold the lock
            ctx.kernel.yield_same();
            guard.push(pid);
        }
    }

    #[test]
    fn mutual_exclusion() {
        let ctx = Ctx::new();
        let a = ctx.kernel.thread_create(push_yielding, ctx, stack(), 2).unwrap();
        let b = ctx.kernel.thread_create(push_yielding, ctx, stack(), 2).unwrap();

        ctx.kernel.run();

        assert!(!ctx.mutex.is_locked(ctx.kernel));
        // SAFETY: all threads are done.
        let values = unsafe { &*ctx.mutex.inner.get() };
        assert_eq!(values.len(), 8);
        for pair in values.chunks(2) {
            assert_eq!(pair[0], pair[1]);
        }
        assert!(values.contains(&a) && values.contains(&b));
    }

    fn try_twice(ctx: &'static Ctx) {
        let guard = ctx.mutex.try_lock(ctx.kernel);
        assert!(guard.is_some());
        assert!(ctx.mutex.is_locked(ctx.kernel));
        assert!(ctx.mutex.try_lock(ctx.kernel).is_none());
        drop(guard);
        assert!(!ctx.mutex.is_locked(ctx.kernel));
        ctx.record("done");
    }

    #[test]
    fn try_lock() {
        let ctx = Ctx::new();
        ctx.kernel.thread_create(try_twice, ctx, stack(), 1).unwrap();
        ctx.kernel.run();
        assert_eq!(ctx.events().len(), 1);
    }

    fn low_owner(ctx: &'static Ctx) {
        let me = ctx.kernel.current_pid().unwrap();
        let guard = ctx.mutex.lock(ctx.kernel);
        ctx.record("low locked");
        // wakes up the urgent thread, which blocks on the mutex
        ctx.kernel.sleep();
        ctx.record("low resumed");
        assert_eq!(ctx.kernel.get_priority(me), Some(1));
        drop(guard);
        assert_eq!(ctx.kernel.get_priority(me), Some(5));
        ctx.record("low done");
    }

    fn high_waiter(ctx: &'static Ctx) {
        ctx.record("high start");
        let _guard = ctx.mutex.lock(ctx.kernel);
        ctx.record("high locked");
    }

    fn mid_spinner(ctx: &'static Ctx) {
        ctx.record("mid");
    }

    #[test]
    fn priority_inheritance() {
        let ctx = Ctx::new();
        let low = ctx.kernel.thread_create(low_owner, ctx, stack(), 5).unwrap();

        ctx.kernel.run();
        assert_eq!(ctx.kernel.get_state(low), Some(ThreadState::Sleeping));
        assert!(ctx.mutex.is_locked(ctx.kernel));

        let high = ctx.kernel.thread_create(high_waiter, ctx, stack(), 1).unwrap();
        let mid = ctx.kernel.thread_create(mid_spinner, ctx, stack(), 3).unwrap();
        // "interrupt" wakes the owner, the urgent thread runs first and blocks
        assert!(ctx.kernel.wakeup(low));

        ctx.kernel.run();

        assert_eq!(
            ctx.events(),
            [
                ("low locked", low),
                ("high start", high),
                // boosted above `mid` while `high` waits
                ("low resumed", low),
                ("high locked", high),
                // back to its own priority
                ("mid", mid),
                ("low done", low),
            ]
        );
        assert!(!ctx.mutex.is_locked(ctx.kernel));
    }

    fn nested_owner(ctx: &'static Ctx) {
        let me = ctx.kernel.current_pid().unwrap();
        let outer = ctx.mutex.lock(ctx.kernel);
        let inner = ctx.other.lock(ctx.kernel);
        ctx.record("low locked both");
        ctx.kernel.sleep();
        // nobody waits for `other`, `mutex` keeps lending
        drop(inner);
        ctx.record("low still boosted");
        assert_eq!(ctx.kernel.get_priority(me), Some(1));
        drop(outer);
        assert_eq!(ctx.kernel.get_priority(me), Some(5));
        ctx.record("low done");
    }

    #[test]
    fn nested_locks_keep_inherited_priority() {
        let ctx = Ctx::new();
        let low = ctx.kernel.thread_create(nested_owner, ctx, stack(), 5).unwrap();
        ctx.kernel.run();

        let high = ctx.kernel.thread_create(high_waiter, ctx, stack(), 1).unwrap();
        let mid = ctx.kernel.thread_create(mid_spinner, ctx, stack(), 3).unwrap();
        assert!(ctx.kernel.wakeup(low));

        ctx.kernel.run();

        assert_eq!(
            ctx.events(),
            [
                ("low locked both", low),
                ("high start", high),
                ("low still boosted", low),
                ("high locked", high),
                ("mid", mid),
                ("low done", low),
            ]
        );
        assert!(!ctx.mutex.is_locked(ctx.kernel));
        assert!(!ctx.other.is_locked(ctx.kernel));
    }

    fn boost_then_lower(ctx: &'static Ctx) {
        let me = ctx.kernel.current_pid().unwrap();
        let guard = ctx.mutex.lock(ctx.kernel);
        ctx.kernel.sleep();
        // the waiter's priority wins over the new base priority
        ctx.kernel.set_priority(me, 7);
        assert_eq!(ctx.kernel.get_priority(me), Some(1));
        drop(guard);
        assert_eq!(ctx.kernel.get_priority(me), Some(7));
        ctx.record("low done");
    }

    #[test]
    fn priority_change_while_boosted() {
        let ctx = Ctx::new();
        let low = ctx.kernel.thread_create(boost_then_lower, ctx, stack(), 5).unwrap();
        ctx.kernel.run();

        let high = ctx.kernel.thread_create(high_waiter, ctx, stack(), 1).unwrap();
        let mid = ctx.kernel.thread_create(mid_spinner, ctx, stack(), 6).unwrap();
        assert!(ctx.kernel.wakeup(low));

        ctx.kernel.run();

        assert_eq!(
            ctx.events(),
            [
                ("high start", high),
                ("high locked", high),
                // base priority 7 now, less urgent than `mid`
                ("mid", mid),
                ("low done", low),
            ]
        );
    }
}
