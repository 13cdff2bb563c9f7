//! Scoped critical sections.

use core::marker::PhantomData;

use critical_section::{CriticalSection, RestoreState};

use crate::{
    arch::{Arch, Cpu},
    Kernel,
};

/// An active critical section, left when dropped.
///
/// Nested guards restore exactly the state their acquisition found. Dropping
/// the outermost guard is the point where a pending context switch happens.
#[must_use = "the critical section ends when the guard is dropped"]
pub struct CriticalSectionGuard<'k> {
    kernel: &'k Kernel,
    restore_state: RestoreState,
    // Must be released on the thread that acquired it.
    _not_send: PhantomData<*mut ()>,
}

impl<'k> CriticalSectionGuard<'k> {
    pub(crate) fn new(kernel: &'k Kernel) -> Self {
        // SAFETY: released exactly once, in `drop()`, in LIFO order with
        // other guards as guards are scoped values.
        let restore_state = unsafe { critical_section::acquire() };
        Cpu::cs_enter();
        Self {
            kernel,
            restore_state,
            _not_send: PhantomData,
        }
    }

    /// Returns a token proving that the critical section is active.
    pub fn token(&self) -> CriticalSection<'_> {
        // SAFETY: the critical section lives as long as `self`.
        unsafe { CriticalSection::new() }
    }
}

impl Drop for CriticalSectionGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: pairs with the `acquire()` in `new()`.
        unsafe { critical_section::release(self.restore_state) };
        Cpu::cs_exit(self.kernel);
    }
}
