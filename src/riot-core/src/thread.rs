use core::ptr::NonNull;

use crate::{arch::ThreadData, RunqueueId, ThreadId, SCHED_PRIO_LEVELS};

/// Main struct for holding thread data
#[derive(Debug)]
pub(crate) struct Thread {
    pub sp: usize,
    pub state: ThreadState,
    /// Effective priority, the most urgent of `base_prio` and the lent ones.
    pub prio: RunqueueId,
    /// Priority without inheritance.
    pub base_prio: RunqueueId,
    /// Number of locks lending each priority level to this thread.
    pub lent: [u8; SCHED_PRIO_LEVELS],
    pub pid: ThreadId,
    /// Hand-off slot of a blocked thread, see [`crate::slot::Slot`].
    pub wait_data: Option<NonNull<()>>,
    #[allow(dead_code)]
    pub data: ThreadData,
}

// SAFETY: `wait_data` points into the stack of the blocked thread itself and is
// only dereferenced inside critical sections, while that thread is blocked.
unsafe impl Send for Thread {}

/// Possible states of a thread
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ThreadState {
    /// Unused thread slot.
    Invalid,
    /// Currently executing.
    Running,
    /// Runnable, waiting for the CPU.
    Pending,
    /// Suspended until woken with [`crate::Kernel::wakeup()`].
    Sleeping,
    /// Waiting for a synchronization primitive.
    Blocked(BlockReason),
}

impl ThreadState {
    /// Runnable threads are the ones in the run queue.
    pub const fn is_runnable(self) -> bool {
        matches!(self, Self::Running | Self::Pending)
    }
}

/// What a [`ThreadState::Blocked`] thread waits for.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BlockReason {
    Mutex,
    Mailbox,
    Semaphore,
    Barrier,
}

impl Thread {
    /// create a default Thread object
    pub const fn default() -> Thread {
        Thread {
            sp: 0,
            state: ThreadState::Invalid,
            prio: 0,
            base_prio: 0,
            lent: [0; SCHED_PRIO_LEVELS],
            pid: 0,
            wait_data: None,
            data: crate::arch::DEFAULT_THREAD_DATA,
        }
    }

    /// The most urgent of the base priority and all lent priorities.
    pub fn effective_prio(&self) -> RunqueueId {
        self.lent
            .iter()
            .position(|&count| count > 0)
            .map_or(self.base_prio, |lent| self.base_prio.min(lent as RunqueueId))
    }
}
