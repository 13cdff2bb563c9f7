use crate::{Kernel, ThreadId};

/// Architecture back end of the scheduler.
pub(crate) trait Arch {
    /// Prepares the context of thread `pid` so that its first activation runs
    /// `entry`, and returns its initial stack pointer.
    fn setup_thread(
        kernel: &'static Kernel,
        pid: ThreadId,
        stack: &'static mut [u8],
        entry: ThreadEntry,
    ) -> usize;

    /// Requests a context switch.
    ///
    /// The switch happens once no critical section is active anymore.
    fn schedule(kernel: &Kernel);

    /// Called after a critical section was entered.
    fn cs_enter();

    /// Called after a critical section was left.
    fn cs_exit(kernel: &Kernel);

    /// Returns `true` if running in thread mode (not in an exception handler).
    fn is_thread_context(kernel: &Kernel) -> bool;
}

cfg_if::cfg_if! {
    if #[cfg(all(target_arch = "arm", target_os = "none"))] {
        mod cortex_m;
        pub(crate) use self::cortex_m::*;
    }
    else if #[cfg(not(target_os = "none"))] {
        mod hosted;
        pub(crate) use self::hosted::*;
    }
    else {
        mod unsupported;
        pub(crate) use self::unsupported::*;
    }
}
