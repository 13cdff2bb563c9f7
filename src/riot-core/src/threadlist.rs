use core::ptr::NonNull;

use critical_section::CriticalSection;
use ordered_queue::OrderedQueue;

use crate::{thread::Thread, Kernel, RunqueueId, ThreadId, ThreadState};

/// Manages blocked [`Thread`]s for a resource, and triggering the scheduler when needed.
///
/// Threads are kept sorted by priority, FIFO among equal priorities.
#[derive(Debug, Default)]
pub(crate) struct ThreadList {
    queue: OrderedQueue<ThreadId>,
}

/// A thread removed from a [`ThreadList`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Waiter {
    pub pid: ThreadId,
    pub prio: RunqueueId,
    pub old_state: ThreadState,
    /// The `wait_data` the thread blocked with.
    pub wait_data: Option<NonNull<()>>,
}

impl ThreadList {
    /// Creates a new empty [`ThreadList`]
    pub const fn new() -> Self {
        Self {
            queue: OrderedQueue::new(),
        }
    }

    /// Puts the current thread into this [`ThreadList`], sets it to `state`
    /// and triggers the scheduler.
    ///
    /// The thread is linked and blocked before the caller leaves its critical
    /// section, where the context switch happens.
    ///
    /// Returns the thread's [`ThreadId`] and priority.
    ///
    /// # Panics
    ///
    /// Panics if this is called outside of a thread context.
    pub fn put_current(
        &mut self,
        kernel: &Kernel,
        cs: CriticalSection,
        state: ThreadState,
        wait_data: Option<NonNull<()>>,
    ) -> (ThreadId, RunqueueId) {
        debug_assert!(kernel.is_thread_context());
        let res = kernel.scheduler.with_mut_cs(cs, |mut scheduler| {
            let &mut Thread { pid, prio, .. } = scheduler
                .current()
                .expect("Function should be called inside a thread context.");
            scheduler.get_unchecked_mut(pid).wait_data = wait_data;
            scheduler.enqueue(&mut self.queue, pid);
            scheduler.set_state(pid, state);
            (pid, prio)
        });
        kernel.schedule();
        res
    }

    /// Removes the head from this [`ThreadList`] and makes it runnable.
    ///
    /// `deliver` runs before the thread is set [`ThreadState::Pending`]; it is
    /// where a waker fills the thread's hand-off slot.
    ///
    /// Does not trigger the scheduler, callers follow up with
    /// [`Kernel::sched_switch_cs()`] when they are done.
    pub fn pop_with(
        &mut self,
        kernel: &Kernel,
        cs: CriticalSection,
        deliver: impl FnOnce(&Waiter),
    ) -> Option<Waiter> {
        if self.queue.is_empty() {
            return None;
        }
        kernel.scheduler.with_mut_cs(cs, |mut scheduler| {
            let pid = self.queue.remove_head(&mut *scheduler)?;
            let thread = scheduler.get_unchecked_mut(pid);
            let waiter = Waiter {
                pid,
                prio: thread.prio,
                old_state: thread.state,
                wait_data: thread.wait_data.take(),
            };
            deliver(&waiter);
            scheduler.set_state(pid, ThreadState::Pending);
            Some(waiter)
        })
    }

    /// Removes the head from this [`ThreadList`], see [`ThreadList::pop_with()`].
    pub fn pop(&mut self, kernel: &Kernel, cs: CriticalSection) -> Option<Waiter> {
        self.pop_with(kernel, cs, |_| {})
    }

    /// Priority the head of this [`ThreadList`] was queued with.
    pub fn head_prio(&self, kernel: &Kernel, cs: CriticalSection) -> Option<RunqueueId> {
        let head = self.queue.peek_head()?;
        Some(kernel.scheduler.with_cs(cs, |scheduler| scheduler.wait_prio(head)))
    }

    /// Determines if this [`ThreadList`] is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
