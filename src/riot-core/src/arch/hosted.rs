//! Hosted back end: every kernel thread is an OS thread.
//!
//! A single "CPU" token is passed between the OS threads, so exactly one
//! kernel thread runs at a time. The OS thread calling [`run()`] holds the
//! token whenever no kernel thread is runnable, and acts as the idle loop.
//! Outside of `run()` it behaves like an interrupt handler.
//!
//! Context switches are requested with [`Arch::schedule()`] and carried out
//! when the outermost critical section of the requesting OS thread ends.
use std::{
    any::Any,
    cell::Cell,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Condvar, Mutex, MutexGuard, PoisonError,
    },
    thread,
};

use super::Arch;
use crate::{Arguable, Kernel, ThreadId};

pub(crate) type ThreadData = ();
pub(crate) const DEFAULT_THREAD_DATA: ThreadData = ();

thread_local! {
    /// Kernel (by address) and thread id of the kernel thread backed by this
    /// OS thread.
    static CURRENT: Cell<Option<(usize, ThreadId)>> = const { Cell::new(None) };
    /// Nesting depth of kernel critical sections on this OS thread.
    static CS_DEPTH: Cell<usize> = const { Cell::new(0) };
}

#[derive(Default)]
struct CpuState {
    /// The kernel thread that may run, `None` if the idle loop has the CPU.
    on_cpu: Option<ThreadId>,
    /// Payload of a panicking kernel thread, re-raised by [`run()`].
    panic: Option<Box<dyn Any + Send>>,
}

pub(crate) struct State {
    cpu: Mutex<CpuState>,
    cpu_changed: Condvar,
    switch_pending: AtomicBool,
}

impl State {
    pub const fn new() -> Self {
        Self {
            cpu: Mutex::new(CpuState {
                on_cpu: None,
                panic: None,
            }),
            cpu_changed: Condvar::new(),
            switch_pending: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CpuState> {
        self.cpu.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn hand_over(&self, next: Option<ThreadId>) {
        self.lock().on_cpu = next;
        self.cpu_changed.notify_all();
    }

    fn wait_for_cpu(&self, pid: ThreadId) {
        let mut cpu = self.lock();
        while cpu.on_cpu != Some(pid) {
            cpu = self
                .cpu_changed
                .wait(cpu)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

pub(crate) struct ThreadEntry(Box<dyn FnOnce() + Send>);

impl ThreadEntry {
    pub fn new<T: Arguable>(func: fn(T), arg: T) -> Self {
        Self(Box::new(move || func(arg)))
    }

    pub fn noarg(func: fn()) -> Self {
        Self(Box::new(func))
    }
}

fn kernel_addr(kernel: &Kernel) -> usize {
    kernel as *const Kernel as usize
}

/// The kernel thread backed by the calling OS thread, if it belongs to `kernel`.
fn current(kernel: &Kernel) -> Option<ThreadId> {
    match CURRENT.get() {
        Some((addr, pid)) if addr == kernel_addr(kernel) => Some(pid),
        _ => None,
    }
}

/// Body of every kernel thread's OS thread.
fn trampoline(kernel: &'static Kernel, pid: ThreadId, entry: ThreadEntry) {
    CURRENT.set(Some((kernel_addr(kernel), pid)));
    kernel.arch.wait_for_cpu(pid);
    match panic::catch_unwind(AssertUnwindSafe(entry.0)) {
        Ok(()) => kernel.thread_exit(),
        Err(payload) => {
            // Hand the CPU back to `run()`, which re-raises the panic.
            let mut cpu = kernel.arch.lock();
            cpu.panic = Some(payload);
            cpu.on_cpu = None;
            drop(cpu);
            kernel.arch.cpu_changed.notify_all();
        }
    }
}

/// Gives up the CPU of the running kernel thread `me` for as long as the
/// scheduler selects other threads.
fn reschedule(kernel: &Kernel, me: ThreadId) {
    while kernel.arch.switch_pending.swap(false, Ordering::AcqRel) {
        let (next, alive) = critical_section::with(|cs| {
            kernel
                .scheduler
                .with_mut_cs(cs, |mut scheduler| (scheduler.sched(), scheduler.is_valid_pid(me)))
        });
        if next == Some(me) {
            continue;
        }
        riot_log::trace!("switching from {} to {:?}", me, next);
        kernel.arch.hand_over(next);
        if !alive {
            // Exited, the OS thread ends.
            return;
        }
        kernel.arch.wait_for_cpu(me);
    }
}

fn dispatch(kernel: &Kernel) {
    match current(kernel) {
        Some(me) => reschedule(kernel, me),
        // Interrupt context: the switch happens once `run()` has the CPU.
        None => kernel.arch.cpu_changed.notify_all(),
    }
}

pub(crate) struct Cpu;

impl Arch for Cpu {
    fn setup_thread(
        kernel: &'static Kernel,
        pid: ThreadId,
        _stack: &'static mut [u8],
        entry: ThreadEntry,
    ) -> usize {
        thread::Builder::new()
            .name(format!("riot-thread-{pid}"))
            .spawn(move || trampoline(kernel, pid, entry))
            .expect("failed to spawn OS thread for kernel thread");
        0
    }

    fn schedule(kernel: &Kernel) {
        kernel.arch.switch_pending.store(true, Ordering::Release);
        if CS_DEPTH.get() == 0 {
            dispatch(kernel);
        }
    }

    fn cs_enter() {
        CS_DEPTH.set(CS_DEPTH.get() + 1);
    }

    fn cs_exit(kernel: &Kernel) {
        let depth = CS_DEPTH.get() - 1;
        CS_DEPTH.set(depth);
        // No switching while unwinding, the trampoline cleans up.
        if depth == 0
            && !thread::panicking()
            && kernel.arch.switch_pending.load(Ordering::Acquire)
        {
            dispatch(kernel);
        }
    }

    fn is_thread_context(kernel: &Kernel) -> bool {
        current(kernel).is_some()
    }
}

/// Runs the idle loop on the calling OS thread until no kernel thread is
/// runnable.
pub(crate) fn run(kernel: &'static Kernel) {
    assert!(
        CURRENT.get().is_none(),
        "Kernel::run() called from a kernel thread"
    );
    let state = &kernel.arch;
    state.switch_pending.store(true, Ordering::Release);
    let mut cpu = state.lock();
    loop {
        if let Some(payload) = cpu.panic.take() {
            drop(cpu);
            panic::resume_unwind(payload);
        }
        if cpu.on_cpu.is_none() {
            if !state.switch_pending.swap(false, Ordering::AcqRel) {
                return;
            }
            drop(cpu);
            let next = critical_section::with(|cs| {
                kernel
                    .scheduler
                    .with_mut_cs(cs, |mut scheduler| scheduler.sched())
            });
            cpu = state.lock();
            cpu.on_cpu = next;
            state.cpu_changed.notify_all();
            continue;
        }
        cpu = state
            .cpu_changed
            .wait(cpu)
            .unwrap_or_else(PoisonError::into_inner);
    }
}
