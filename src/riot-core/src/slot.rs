//! Single-use hand-off slot between a blocked thread and the thread waking it.

use core::{
    cell::{Cell, UnsafeCell},
    mem::MaybeUninit,
    ptr::NonNull,
};

/// A value cell living on the stack of a blocked thread.
///
/// The blocked thread publishes it as its `wait_data` before blocking. The
/// waker writes or takes the value through that pointer inside the critical
/// section in which it wakes the thread. The woken thread reads the result
/// after resuming.
pub(crate) struct Slot<T> {
    value: UnsafeCell<MaybeUninit<T>>,
    filled: Cell<bool>,
}

impl<T> Slot<T> {
    pub const fn empty() -> Self {
        Self {
            value: UnsafeCell::new(MaybeUninit::uninit()),
            filled: Cell::new(false),
        }
    }

    pub const fn with(value: T) -> Self {
        Self {
            value: UnsafeCell::new(MaybeUninit::new(value)),
            filled: Cell::new(true),
        }
    }

    /// Type-erased pointer to store in a thread's `wait_data`.
    pub fn as_wait_data(&self) -> NonNull<()> {
        NonNull::from(self).cast()
    }

    /// # Safety
    ///
    /// `wait_data` must come from [`Slot::as_wait_data()`] on a `Slot<T>` of
    /// the same `T` that is still alive, i.e. its thread is still blocked.
    pub unsafe fn from_wait_data<'a>(wait_data: NonNull<()>) -> &'a Self {
        // SAFETY: upheld by the caller.
        unsafe { wait_data.cast::<Self>().as_ref() }
    }

    /// Stores `value`.
    ///
    /// # Panics
    ///
    /// Panics if the slot already holds a value.
    pub fn fill(&self, value: T) {
        assert!(!self.filled.get(), "slot filled twice");
        // SAFETY: the slot is empty, so nothing is overwritten, and no
        // reference into `value` exists.
        unsafe { (*self.value.get()).write(value) };
        self.filled.set(true);
    }

    /// Moves the value out, leaving the slot empty.
    pub fn take(&self) -> Option<T> {
        if !self.filled.replace(false) {
            return None;
        }
        // SAFETY: `filled` was set, so the value is initialized, and clearing
        // the flag makes this the only read.
        Some(unsafe { (*self.value.get()).assume_init_read() })
    }

    pub fn is_filled(&self) -> bool {
        self.filled.get()
    }
}

impl<T> Drop for Slot<T> {
    fn drop(&mut self) {
        drop(self.take());
    }
}

#[cfg(test)]
mod tests {
    use super::Slot;

    #[test]
    fn fill_and_take() {
        let slot: Slot<u32> = Slot::empty();
        assert!(!slot.is_filled());
        assert_eq!(slot.take(), None);

        // SAFETY: the slot is alive and of the same type.
        let erased = unsafe { Slot::<u32>::from_wait_data(slot.as_wait_data()) };
        erased.fill(42);
        assert!(slot.is_filled());
        assert_eq!(slot.take(), Some(42));
        assert_eq!(slot.take(), None);
    }

    #[test]
    fn drops_remaining_value() {
        let value = std::rc::Rc::new(());
        {
            let _slot = Slot::with(value.clone());
            assert_eq!(std::rc::Rc::strong_count(&value), 2);
        }
        assert_eq!(std::rc::Rc::strong_count(&value), 1);
    }

    #[test]
    #[should_panic(expected = "slot filled twice")]
    fn double_fill_panics() {
        let slot = Slot::with(1u8);
        slot.fill(2);
    }
}
