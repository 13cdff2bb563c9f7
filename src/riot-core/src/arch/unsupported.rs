use super::Arch;
use crate::{Arguable, Kernel, ThreadId};

pub(crate) type ThreadData = ();
pub(crate) const DEFAULT_THREAD_DATA: ThreadData = ();

pub(crate) struct State;

impl State {
    pub const fn new() -> Self {
        Self
    }
}

pub(crate) struct ThreadEntry;

impl ThreadEntry {
    pub fn new<T: Arguable>(_func: fn(T), _arg: T) -> Self {
        unimplemented!()
    }

    pub fn noarg(_func: fn()) -> Self {
        unimplemented!()
    }
}

pub(crate) struct Cpu;

impl Arch for Cpu {
    fn setup_thread(
        _kernel: &'static Kernel,
        _pid: ThreadId,
        _stack: &'static mut [u8],
        _entry: ThreadEntry,
    ) -> usize {
        unimplemented!()
    }

    fn schedule(_kernel: &Kernel) {
        unimplemented!();
    }

    fn cs_enter() {}

    fn cs_exit(_kernel: &Kernel) {}

    fn is_thread_context(_kernel: &Kernel) -> bool {
        unimplemented!()
    }
}
