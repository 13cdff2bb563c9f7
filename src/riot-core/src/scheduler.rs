use ordered_queue::{Links, OrderedQueue};
use riot_runqueue::RunQueue;

use crate::{
    thread::Thread, RunqueueId, ThreadId, ThreadState, SCHED_PRIO_LEVELS, THREAD_COUNT,
};

/// Struct holding all scheduler state
pub(crate) struct Scheduler {
    /// Global thread runqueue.
    runqueue: RunQueue<SCHED_PRIO_LEVELS, THREAD_COUNT>,
    /// The actual TCBs.
    threads: [Thread; THREAD_COUNT],
    /// Next links of the waiting lists, see [`crate::threadlist::ThreadList`].
    ///
    /// A thread is linked into at most one waiting list at a time.
    thread_blocklist: [Option<ThreadId>; THREAD_COUNT],
    /// Sort keys of the waiting lists, the priority a thread had when it
    /// was linked.
    thread_blockprio: [RunqueueId; THREAD_COUNT],
    /// The currently running thread.
    current_thread: Option<ThreadId>,
}

impl Scheduler {
    pub const fn new() -> Self {
        Self {
            runqueue: RunQueue::new(),
            threads: [const { Thread::default() }; THREAD_COUNT],
            thread_blocklist: [None; THREAD_COUNT],
            thread_blockprio: [0; THREAD_COUNT],
            current_thread: None,
        }
    }

    /// Returns checked mutable access to the thread data of the currently
    /// running thread.
    ///
    /// Returns `None` if there is no current thread.
    pub fn current(&mut self) -> Option<&mut Thread> {
        self.current_thread
            .map(|tid| &mut self.threads[usize::from(tid)])
    }

    pub fn current_pid(&self) -> Option<ThreadId> {
        self.current_thread
    }

    /// Claims an unused thread slot for a thread of priority `prio`.
    ///
    /// The thread is left [`ThreadState::Sleeping`] so it is not scheduled
    /// before its context is set up.
    ///
    /// Returns `None` if there is no free thread slot.
    pub fn reserve(&mut self, prio: RunqueueId) -> Option<ThreadId> {
        let pid = self
            .threads
            .iter()
            .position(|thread| thread.state == ThreadState::Invalid)?;
        let thread = &mut self.threads[pid];
        *thread = Thread::default();
        thread.pid = pid as ThreadId;
        thread.prio = prio;
        thread.base_prio = prio;
        thread.state = ThreadState::Sleeping;
        self.thread_blocklist[pid] = None;
        self.thread_blockprio[pid] = prio;
        Some(thread.pid)
    }

    /// Returns access to any thread data.
    ///
    /// # Panics
    ///
    /// Panics if `thread_id` is >= [`THREAD_COUNT`].
    /// If the thread for this `thread_id` is in an invalid state, the
    /// data in the returned [`Thread`] is undefined, i.e. empty or outdated.
    pub fn get_unchecked(&self, thread_id: ThreadId) -> &Thread {
        &self.threads[usize::from(thread_id)]
    }

    /// Returns mutable access to any thread data, see [`Scheduler::get_unchecked()`].
    pub fn get_unchecked_mut(&mut self, thread_id: ThreadId) -> &mut Thread {
        &mut self.threads[usize::from(thread_id)]
    }

    /// Checks if a thread with valid state exists for this `thread_id`.
    pub fn is_valid_pid(&self, thread_id: ThreadId) -> bool {
        self.threads
            .get(usize::from(thread_id))
            .is_some_and(|thread| thread.state != ThreadState::Invalid)
    }

    /// Sets the state of a thread.
    ///
    /// This function handles adding/ removing the thread to the Runqueue depending
    /// on its previous or new state. It does not touch any waiting list.
    ///
    /// Returns the previous state.
    ///
    /// # Panics
    ///
    /// Panics if `pid` is >= [`THREAD_COUNT`].
    pub fn set_state(&mut self, pid: ThreadId, state: ThreadState) -> ThreadState {
        let thread = &mut self.threads[usize::from(pid)];
        let old_state = core::mem::replace(&mut thread.state, state);
        match (old_state.is_runnable(), state.is_runnable()) {
            (false, true) => self.runqueue.add(pid, thread.prio),
            (true, false) => self.runqueue.del(pid, thread.prio),
            _ => {}
        }
        old_state
    }

    /// Returns the state of a thread.
    pub fn get_state(&self, thread_id: ThreadId) -> Option<ThreadState> {
        self.is_valid_pid(thread_id)
            .then(|| self.get_unchecked(thread_id).state)
    }

    pub fn get_priority(&self, thread_id: ThreadId) -> Option<RunqueueId> {
        self.is_valid_pid(thread_id)
            .then(|| self.get_unchecked(thread_id).prio)
    }

    /// Changes the base priority of a thread.
    ///
    /// Priorities lent through [`Scheduler::lend_priority()`] still apply on top.
    /// Returns `true` if the thread was moved inside the runqueue, in which
    /// case the scheduler should be invoked.
    pub fn set_priority(&mut self, thread_id: ThreadId, prio: RunqueueId) -> bool {
        if !self.is_valid_pid(thread_id) {
            return false;
        }
        self.get_unchecked_mut(thread_id).base_prio = prio;
        self.update_priority(thread_id)
    }

    /// Replaces a priority lent to `thread_id`, `from` being the one lent so
    /// far and `to` the new one.
    ///
    /// The thread runs at the most urgent of its base priority and all
    /// priorities currently lent to it.
    /// Returns `true` if the thread was moved inside the runqueue.
    pub fn lend_priority(
        &mut self,
        thread_id: ThreadId,
        from: Option<RunqueueId>,
        to: Option<RunqueueId>,
    ) -> bool {
        if from == to || !self.is_valid_pid(thread_id) {
            return false;
        }
        let lent = &mut self.get_unchecked_mut(thread_id).lent;
        if let Some(prio) = from {
            let count = &mut lent[usize::from(prio)];
            debug_assert!(*count > 0, "priority was not lent");
            *count = count.saturating_sub(1);
        }
        if let Some(prio) = to {
            lent[usize::from(prio)] += 1;
        }
        self.update_priority(thread_id)
    }

    /// Applies the effective priority of a thread.
    ///
    /// The position of a blocked thread in its waiting list is not updated,
    /// that list keeps sorting by [`Scheduler::enqueue()`] time priority.
    fn update_priority(&mut self, thread_id: ThreadId) -> bool {
        let thread = self.get_unchecked_mut(thread_id);
        let prio = thread.effective_prio();
        let old_prio = core::mem::replace(&mut thread.prio, prio);
        if old_prio == prio || !thread.state.is_runnable() {
            return false;
        }
        self.runqueue.del(thread_id, old_prio);
        self.runqueue.add(thread_id, prio);
        true
    }

    /// Links a thread into a waiting list, sorted by its current priority.
    pub fn enqueue(&mut self, queue: &mut OrderedQueue<ThreadId>, thread_id: ThreadId) {
        self.thread_blockprio[usize::from(thread_id)] = self.get_unchecked(thread_id).prio;
        queue.insert(self, thread_id);
    }

    /// Priority a thread was linked into its waiting list with.
    pub fn wait_prio(&self, thread_id: ThreadId) -> RunqueueId {
        self.thread_blockprio[usize::from(thread_id)]
    }

    /// Moves the current thread behind the other threads of its priority.
    pub fn yield_current(&mut self) {
        if let Some(&mut Thread { pid, prio, state, .. }) = self.current() {
            if state.is_runnable() {
                self.runqueue.advance_from(pid, prio);
            }
        }
    }

    /// Whether a thread of priority `prio` that just became runnable should
    /// preempt the current thread.
    pub fn should_switch(&self, prio: RunqueueId) -> bool {
        match self.current_thread {
            None => true,
            Some(current) => {
                let current = self.get_unchecked(current);
                !current.state.is_runnable() || prio < current.prio
            }
        }
    }

    /// Selects the next thread to run and makes it the current thread.
    ///
    /// A previous thread that is still running becomes [`ThreadState::Pending`].
    /// Returns `None` if no thread is runnable, there is no current thread then.
    pub fn sched(&mut self) -> Option<ThreadId> {
        let next = self.runqueue.get_next();
        let prev = self.current_thread;
        if next == prev {
            return next;
        }
        if let Some(prev) = prev {
            if self.get_unchecked(prev).state == ThreadState::Running {
                self.get_unchecked_mut(prev).state = ThreadState::Pending;
            }
        }
        if let Some(next) = next {
            self.get_unchecked_mut(next).state = ThreadState::Running;
        }
        self.current_thread = next;
        next
    }

    /// Stack pointer of the thread [`Scheduler::sched()`] would select.
    #[allow(dead_code)]
    pub fn next_sp(&self) -> Option<usize> {
        self.runqueue
            .get_next()
            .map(|pid| self.get_unchecked(pid).sp)
    }
}

/// The waiting lists are sorted by the priority threads had when they were
/// linked, see [`Scheduler::enqueue()`].
impl Links for Scheduler {
    type Id = ThreadId;

    fn next(&self, node: ThreadId) -> Option<ThreadId> {
        self.thread_blocklist[usize::from(node)]
    }

    fn set_next(&mut self, node: ThreadId, next: Option<ThreadId>) {
        self.thread_blocklist[usize::from(node)] = next;
    }

    fn priority(&self, node: ThreadId) -> u32 {
        u32::from(self.wait_prio(node))
    }
}
