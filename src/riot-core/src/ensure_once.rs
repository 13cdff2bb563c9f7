//! This module provides a Mutex-protected [`RefCell`] --- basically a way to ensure
//! at runtime that some reference is used only once.
use core::cell::{Ref, RefCell, RefMut};
use critical_section::{CriticalSection, Mutex};

pub(crate) struct EnsureOnce<T> {
    inner: Mutex<RefCell<T>>,
}

impl<T> EnsureOnce<T> {
    pub const fn new(inner: T) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(inner)),
        }
    }

    /// Shared access for the duration of `f`.
    ///
    /// # Panics
    ///
    /// Panics if called from within [`EnsureOnce::with_mut_cs()`].
    pub fn with_cs<F, R>(&self, cs: CriticalSection, f: F) -> R
    where
        F: FnOnce(Ref<T>) -> R,
    {
        f(self.inner.borrow(cs).borrow())
    }

    /// Exclusive access for the duration of `f`.
    ///
    /// # Panics
    ///
    /// Panics on reentrant use.
    pub fn with_mut_cs<F, R>(&self, cs: CriticalSection, f: F) -> R
    where
        F: FnOnce(RefMut<T>) -> R,
    {
        f(self.inner.borrow(cs).borrow_mut())
    }

    /// Raw access that bypasses the borrow tracking, for the context switch
    /// code, which runs with interrupts disabled.
    #[allow(dead_code)]
    pub fn as_ptr(&self, cs: CriticalSection) -> *mut T {
        self.inner.borrow(cs).as_ptr()
    }
}
