//! Scheduler and inter-thread synchronization core of RIOT.
//!
//! All kernel state lives in a [`Kernel`], usually a `static`. Threads are
//! created with [`Kernel::thread_create()`] and scheduled by priority, a lower
//! number meaning a more urgent thread. Threads of equal priority are
//! scheduled round-robin when they yield.
//!
//! The blocking primitives in [`sync`] ([`Mbox`], [`Semaphore`], [`Barrier`]
//! and [`Mutex`]) take the kernel by reference. Each of them enqueues the
//! calling thread on a priority-ordered waiting list, marks it blocked and
//! triggers the scheduler, all inside one critical section. The context switch
//! happens when that critical section is left.
//!
//! On bare-metal Cortex-M the kernel switches contexts in PendSV. On hosted
//! targets every kernel thread is backed by an OS thread and only one of them
//! runs at a time, see [`Kernel::run()`].

#![cfg_attr(target_os = "none", no_std)]
// Disable indexing lints for now, possible panics are documented or rely on internally-enforced
// invariants
#![allow(clippy::indexing_slicing)]

use critical_section::CriticalSection;

pub use riot_runqueue::{RunqueueId, ThreadId};

mod arch;
mod critical;
mod ensure_once;
mod msg;
mod scheduler;
mod slot;
mod thread;
mod threadlist;

pub mod sync;

#[cfg(test)]
mod test_utils;

pub use critical::CriticalSectionGuard;
pub use msg::Msg;
pub use sync::{Barrier, Mbox, Mutex, MutexGuard, Semaphore, SemaphoreOverflow};
pub use thread::{BlockReason, ThreadState};

use arch::{Arch, Cpu, ThreadEntry};
use ensure_once::EnsureOnce;
use scheduler::Scheduler;

/// Maximum number of threads, `CONFIG_THREAD_COUNT` at build time.
pub const THREAD_COUNT: usize =
    riot_utils::usize_from_env_or!("CONFIG_THREAD_COUNT", 16, "maximum number of threads");

/// Number of priority levels, `CONFIG_SCHED_PRIO_LEVELS` at build time.
///
/// Valid priorities are `0..SCHED_PRIO_LEVELS`, `0` being the most urgent.
pub const SCHED_PRIO_LEVELS: usize = riot_utils::usize_from_env_or!(
    "CONFIG_SCHED_PRIO_LEVELS",
    16,
    "number of scheduler priority levels"
);

const _: () = assert!(
    THREAD_COUNT > 0 && THREAD_COUNT < 0xFF,
    "CONFIG_THREAD_COUNT must be in 1..255"
);
const _: () = assert!(
    SCHED_PRIO_LEVELS > 0 && SCHED_PRIO_LEVELS <= usize::BITS as usize,
    "CONFIG_SCHED_PRIO_LEVELS must be in 1..=usize::BITS"
);

/// Error returned by [`Kernel::thread_create()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CreateError {
    /// All [`THREAD_COUNT`] thread slots are in use.
    NoFreeSlot,
    /// The priority is not below [`SCHED_PRIO_LEVELS`].
    InvalidPriority,
}

impl core::fmt::Display for CreateError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NoFreeSlot => f.write_str("no free thread slot"),
            Self::InvalidPriority => f.write_str("invalid thread priority"),
        }
    }
}

/// Trait for types that fit into a single register.
///
/// Currently implemented for `usize`, `()` and `&'static T`.
///
/// # Safety
///
/// Implementors must be passed in `r0` by the Rust ABI, as the value is placed
/// there when a new thread starts on Cortex-M.
pub unsafe trait Arguable: Send + 'static {
    fn into_arg(self) -> usize;
}

// SAFETY: a `usize` is passed in a single register.
unsafe impl Arguable for usize {
    fn into_arg(self) -> usize {
        self
    }
}

// SAFETY: `()` occupies no register, the value in `r0` is ignored.
unsafe impl Arguable for () {
    fn into_arg(self) -> usize {
        0
    }
}

// SAFETY: a reference is passed in a single register.
unsafe impl<T: Sync> Arguable for &'static T {
    fn into_arg(self) -> usize {
        self as *const T as usize
    }
}

/// The kernel: thread table, run queue and architecture state.
pub struct Kernel {
    pub(crate) scheduler: EnsureOnce<Scheduler>,
    pub(crate) arch: arch::State,
}

impl Kernel {
    /// Creates a kernel without threads.
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            scheduler: EnsureOnce::new(Scheduler::new()),
            arch: arch::State::new(),
        }
    }

    /// Enters a critical section.
    ///
    /// Critical sections nest. Leaving the outermost one applies a pending
    /// context switch.
    pub fn critical_section(&self) -> CriticalSectionGuard<'_> {
        CriticalSectionGuard::new(self)
    }

    /// Runs `f` inside a critical section.
    pub fn with_cs<R>(&self, f: impl FnOnce(CriticalSection<'_>) -> R) -> R {
        let guard = self.critical_section();
        let res = f(guard.token());
        // The switch (if any) happens here, after `f`'s borrows have ended.
        drop(guard);
        res
    }

    /// Creates a thread that runs `func(arg)` on `stack` with priority `prio`.
    ///
    /// The thread starts [`ThreadState::Pending`]. If it is more urgent than the
    /// caller, it runs as soon as the caller leaves its critical section.
    ///
    /// On hosted targets `stack` is unused, the thread runs on an OS thread.
    pub fn thread_create<T: Arguable>(
        &'static self,
        func: fn(arg: T),
        arg: T,
        stack: &'static mut [u8],
        prio: RunqueueId,
    ) -> Result<ThreadId, CreateError> {
        self.thread_create_entry(ThreadEntry::new(func, arg), stack, prio)
    }

    /// Creates a thread that runs `func()`, see [`Kernel::thread_create()`].
    pub fn thread_create_noarg(
        &'static self,
        func: fn(),
        stack: &'static mut [u8],
        prio: RunqueueId,
    ) -> Result<ThreadId, CreateError> {
        self.thread_create_entry(ThreadEntry::noarg(func), stack, prio)
    }

    fn thread_create_entry(
        &'static self,
        entry: ThreadEntry,
        stack: &'static mut [u8],
        prio: RunqueueId,
    ) -> Result<ThreadId, CreateError> {
        if usize::from(prio) >= SCHED_PRIO_LEVELS {
            return Err(CreateError::InvalidPriority);
        }
        self.with_cs(|cs| {
            let pid = self
                .scheduler
                .with_mut_cs(cs, |mut scheduler| scheduler.reserve(prio))
                .ok_or(CreateError::NoFreeSlot)?;
            let sp = Cpu::setup_thread(self, pid, stack, entry);
            self.scheduler.with_mut_cs(cs, |mut scheduler| {
                scheduler.get_unchecked_mut(pid).sp = sp;
                scheduler.set_state(pid, ThreadState::Pending);
            });
            riot_log::debug!("thread {} created with priority {}", pid, prio);
            self.sched_switch_cs(cs, prio);
            Ok(pid)
        })
    }

    /// Starts threading.
    ///
    /// Supposed to be started early on by OS startup code.
    ///
    /// # Safety
    ///
    /// This may only be called once, from the reset handler while MSP is active.
    ///
    /// # Panics
    ///
    /// Panics if no thread exists.
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    pub unsafe fn start_threading(&'static self) {
        riot_log::info!("starting threading");
        // SAFETY: caller ensures invariants
        unsafe { arch::start_threading(self) }
    }

    /// Runs the kernel threads until no thread is runnable.
    ///
    /// The calling OS thread plays the role of the idle loop. Between calls to
    /// `run()` it may use the kernel the way an interrupt handler would, e.g.
    /// [`Mbox::try_put()`] or [`Semaphore::post()`].
    ///
    /// # Panics
    ///
    /// Re-raises the panic of a kernel thread. Panics if called from a kernel
    /// thread.
    #[cfg(not(target_os = "none"))]
    pub fn run(&'static self) {
        arch::run(self)
    }

    /// Thread cleanup, entered when a thread function returns.
    pub(crate) fn thread_exit(&self) {
        self.with_cs(|cs| {
            self.scheduler.with_mut_cs(cs, |mut scheduler| {
                let pid = scheduler
                    .current_pid()
                    .expect("Function should be called inside a thread context.");
                scheduler.set_state(pid, ThreadState::Invalid);
                riot_log::debug!("thread {} exited", pid);
            });
            self.schedule();
        });
    }

    /// Returns the [`ThreadId`] of the currently active thread.
    ///
    /// Note: when called from ISRs, this will return the thread id of the thread
    /// that was interrupted.
    pub fn current_pid(&self) -> Option<ThreadId> {
        self.with_cs(|cs| self.scheduler.with_cs(cs, |scheduler| scheduler.current_pid()))
    }

    /// Returns the [`ThreadState`] for this `thread_id`.
    ///
    /// Returns `None` if `thread_id` is out of bound or no thread with
    /// valid state exists.
    pub fn get_state(&self, thread_id: ThreadId) -> Option<ThreadState> {
        self.with_cs(|cs| self.scheduler.with_cs(cs, |scheduler| scheduler.get_state(thread_id)))
    }

    /// Checks if a given [`ThreadId`] is valid.
    pub fn is_valid_pid(&self, thread_id: ThreadId) -> bool {
        self.with_cs(|cs| {
            self.scheduler
                .with_cs(cs, |scheduler| scheduler.is_valid_pid(thread_id))
        })
    }

    /// Returns the priority of a thread.
    pub fn get_priority(&self, thread_id: ThreadId) -> Option<RunqueueId> {
        self.with_cs(|cs| {
            self.scheduler
                .with_cs(cs, |scheduler| scheduler.get_priority(thread_id))
        })
    }

    /// Changes the priority of a thread.
    ///
    /// While the thread holds a [`sync::Mutex`] that more urgent threads wait
    /// for, it keeps running at their priority until it releases the mutex.
    /// This might trigger a context switch.
    ///
    /// # Panics
    ///
    /// Panics if `prio` is not below [`SCHED_PRIO_LEVELS`].
    pub fn set_priority(&self, thread_id: ThreadId, prio: RunqueueId) {
        assert!(usize::from(prio) < SCHED_PRIO_LEVELS, "invalid priority");
        self.with_cs(|cs| self.set_priority_cs(cs, thread_id, prio));
    }

    pub(crate) fn set_priority_cs(&self, cs: CriticalSection<'_>, thread_id: ThreadId, prio: RunqueueId) {
        let requeued = self.scheduler.with_mut_cs(cs, |mut scheduler| {
            scheduler.set_priority(thread_id, prio)
        });
        if requeued {
            riot_log::debug!("thread {} now has priority {}", thread_id, prio);
            self.schedule();
        }
    }

    /// Replaces the priority `from` lent to `thread_id` by `to`.
    ///
    /// The thread runs at the most urgent of its own and all lent priorities.
    pub(crate) fn lend_priority_cs(
        &self,
        cs: CriticalSection<'_>,
        thread_id: ThreadId,
        from: Option<RunqueueId>,
        to: Option<RunqueueId>,
    ) {
        let requeued = self.scheduler.with_mut_cs(cs, |mut scheduler| {
            scheduler
                .lend_priority(thread_id, from, to)
                .then(|| scheduler.get_unchecked(thread_id).prio)
        });
        if let Some(prio) = requeued {
            riot_log::debug!("thread {} now runs at priority {}", thread_id, prio);
            self.schedule();
        }
    }

    /// "Yields" to another thread with the same priority.
    pub fn yield_same(&self) {
        self.with_cs(|cs| {
            self.scheduler.with_mut_cs(cs, |mut scheduler| scheduler.yield_current());
            self.schedule();
        });
    }

    /// Suspends the current thread until [`Kernel::wakeup()`] is called for it.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a thread context.
    pub fn sleep(&self) {
        self.with_cs(|cs| {
            self.scheduler.with_mut_cs(cs, |mut scheduler| {
                let pid = scheduler
                    .current_pid()
                    .expect("Function should be called inside a thread context.");
                scheduler.set_state(pid, ThreadState::Sleeping);
            });
            self.schedule();
        });
    }

    /// Wakes up a sleeping thread and adds it to the runqueue.
    ///
    /// Returns `false` if no sleeping thread exists for `thread_id`.
    pub fn wakeup(&self, thread_id: ThreadId) -> bool {
        self.with_cs(|cs| {
            let prio = self.scheduler.with_mut_cs(cs, |mut scheduler| {
                match scheduler.get_state(thread_id) {
                    Some(ThreadState::Sleeping) => {
                        scheduler.set_state(thread_id, ThreadState::Pending);
                        Some(scheduler.get_unchecked(thread_id).prio)
                    }
                    _ => None,
                }
            });
            match prio {
                Some(prio) => {
                    self.sched_switch_cs(cs, prio);
                    true
                }
                None => false,
            }
        })
    }

    /// Requests a context switch if a thread of priority `prio` should preempt
    /// the current one.
    ///
    /// That is the case if there is no current thread, if the current thread is
    /// not runnable anymore or if `prio` is more urgent than its priority.
    pub fn sched_switch(&self, prio: RunqueueId) {
        self.with_cs(|cs| self.sched_switch_cs(cs, prio));
    }

    pub(crate) fn sched_switch_cs(&self, cs: CriticalSection<'_>, prio: RunqueueId) {
        if self
            .scheduler
            .with_cs(cs, |scheduler| scheduler.should_switch(prio))
        {
            self.schedule();
        }
    }

    /// Triggers the scheduler.
    ///
    /// Inside a critical section the switch is deferred until the outermost
    /// critical section is left.
    pub fn schedule(&self) {
        Cpu::schedule(self);
    }

    /// Returns `true` if called from a kernel thread (not an interrupt handler).
    pub fn is_thread_context(&self) -> bool {
        Cpu::is_thread_context(self)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::test_utils::{kernel, leak, stack};

    struct Ctx {
        kernel: &'static Kernel,
        events: StdMutex<Vec<(&'static str, ThreadId)>>,
    }

    impl Ctx {
        fn new() -> &'static Self {
            leak(Ctx {
                kernel: kernel(),
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

    fn record_and_exit(ctx: &'static Ctx) {
        ctx.record("run");
    }

    #[test]
    fn runs_by_priority() {
        let ctx = Ctx::new();
        let low = ctx.kernel.thread_create(record_and_exit, ctx, stack(), 5).unwrap();
        let high = ctx.kernel.thread_create(record_and_exit, ctx, stack(), 1).unwrap();
        let mid = ctx.kernel.thread_create(record_and_exit, ctx, stack(), 3).unwrap();
        assert_eq!(ctx.kernel.get_state(low), Some(ThreadState::Pending));

        ctx.kernel.run();

        assert_eq!(ctx.events(), [("run", high), ("run", mid), ("run", low)]);
        // exited threads free their slot
        assert!(!ctx.kernel.is_valid_pid(low));
        assert_eq!(ctx.kernel.get_state(high), None);
    }

    fn yielder(ctx: &'static Ctx) {
        for _ in 0..3 {
            ctx.record("tick");
            ctx.kernel.yield_same();
        }
    }

    #[test]
    fn yield_same_round_robin() {
        let ctx = Ctx::new();
        let a = ctx.kernel.thread_create(yielder, ctx, stack(), 2).unwrap();
        let b = ctx.kernel.thread_create(yielder, ctx, stack(), 2).unwrap();

        ctx.kernel.run();

        let order: Vec<ThreadId> = ctx.events().into_iter().map(|(_, pid)| pid).collect();
        assert_eq!(order, [a, b, a, b, a, b]);
    }

    fn child(ctx: &'static Ctx) {
        ctx.record("child");
    }

    fn spawner(ctx: &'static Ctx) {
        ctx.record("spawner start");
        // more urgent: runs before `thread_create()` returns
        ctx.kernel.thread_create(child, ctx, stack(), 0).unwrap();
        ctx.record("spawner end");
    }

    #[test]
    fn create_preempts_when_more_urgent() {
        let ctx = Ctx::new();
        let spawner_pid = ctx.kernel.thread_create(spawner, ctx, stack(), 4).unwrap();

        ctx.kernel.run();

        let events = ctx.events();
        let names: Vec<&str> = events.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, ["spawner start", "child", "spawner end"]);
        assert_eq!(events[0].1, spawner_pid);
        assert_ne!(events[1].1, spawner_pid);
    }

    fn sleeper(ctx: &'static Ctx) {
        ctx.record("sleeping");
        ctx.kernel.sleep();
        ctx.record("woken");
    }

    #[test]
    fn sleep_and_wakeup() {
        let ctx = Ctx::new();
        let pid = ctx.kernel.thread_create(sleeper, ctx, stack(), 1).unwrap();

        ctx.kernel.run();
        assert_eq!(ctx.kernel.get_state(pid), Some(ThreadState::Sleeping));
        assert_eq!(ctx.kernel.current_pid(), None);

        // from "interrupt" context
        assert!(ctx.kernel.wakeup(pid));
        assert!(!ctx.kernel.wakeup(pid));
        assert_eq!(ctx.kernel.get_state(pid), Some(ThreadState::Pending));

        ctx.kernel.run();
        assert_eq!(ctx.events(), [("sleeping", pid), ("woken", pid)]);
        assert!(!ctx.kernel.wakeup(pid));
    }

    fn reprioritize(ctx: &'static Ctx) {
        let me = ctx.kernel.current_pid().unwrap();
        ctx.record("before");
        // drop below the other thread, which then runs first
        ctx.kernel.set_priority(me, 6);
        ctx.record("after");
    }

    #[test]
    fn set_priority_reschedules() {
        let ctx = Ctx::new();
        let a = ctx.kernel.thread_create(reprioritize, ctx, stack(), 1).unwrap();
        let b = ctx.kernel.thread_create(record_and_exit, ctx, stack(), 3).unwrap();
        assert_eq!(ctx.kernel.get_priority(a), Some(1));

        ctx.kernel.run();

        assert_eq!(ctx.events(), [("before", a), ("run", b), ("after", a)]);
    }

    #[test]
    fn create_errors() {
        let kernel = kernel();
        assert_eq!(
            kernel.thread_create_noarg(|| {}, stack(), SCHED_PRIO_LEVELS as RunqueueId),
            Err(CreateError::InvalidPriority)
        );
        for _ in 0..THREAD_COUNT {
            kernel.thread_create_noarg(|| {}, stack(), 3).unwrap();
        }
        assert_eq!(
            kernel.thread_create_noarg(|| {}, stack(), 3),
            Err(CreateError::NoFreeSlot)
        );

        kernel.run();
        // all slots are free again
        kernel.thread_create_noarg(|| {}, stack(), 3).unwrap();
        kernel.run();
    }

    fn check_context(ctx: &'static Ctx) {
        assert!(ctx.kernel.is_thread_context());
        ctx.record("checked");
    }

    #[test]
    fn thread_context() {
        let ctx = Ctx::new();
        assert!(!ctx.kernel.is_thread_context());
        ctx.kernel.thread_create(check_context, ctx, stack(), 0).unwrap();
        ctx.kernel.run();
        assert_eq!(ctx.events().len(), 1);
    }

    #[test]
    #[should_panic(expected = "boom")]
    fn thread_panic_propagates() {
        let kernel = kernel();
        kernel
            .thread_create_noarg(|| panic!("boom"), stack(), 0)
            .unwrap();
        kernel.run();
    }
}
