use crate::{Kernel, ThreadId};

/// A RIOT message, the usual [`crate::Mbox`] payload.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Msg {
    /// Thread that created the message, `None` if created in interrupt context.
    pub sender_pid: Option<ThreadId>,
    /// Application defined type tag.
    pub msg_type: u16,
    /// Payload, a value or an index.
    pub content: u32,
}

impl Msg {
    /// Creates a message sent by the current thread.
    pub fn new(kernel: &Kernel, msg_type: u16, content: u32) -> Self {
        let sender_pid = if kernel.is_thread_context() {
            kernel.current_pid()
        } else {
            None
        };
        Self {
            sender_pid,
            msg_type,
            content,
        }
    }
}
