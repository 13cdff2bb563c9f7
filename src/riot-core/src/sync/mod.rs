//! Synchronization primitives.
mod barrier;
mod mbox;
mod mutex;
mod semaphore;

pub use barrier::Barrier;
pub use mbox::Mbox;
pub use mutex::{Mutex, MutexGuard};
pub use semaphore::{Semaphore, SemaphoreOverflow};
