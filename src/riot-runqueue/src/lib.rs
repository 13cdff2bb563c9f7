#![cfg_attr(not(test), no_std)]

mod runqueue;
pub use runqueue::{RunQueue, RunqueueId, ThreadId};
