//! Helpers for tests running kernel threads on the hosted back end.

use crate::Kernel;

/// Returns a fresh kernel, so tests running in parallel don't interfere.
pub(crate) fn kernel() -> &'static Kernel {
    let _ = env_logger::builder().is_test(true).try_init();
    leak(Kernel::new())
}

/// Thread stack, unused on hosted targets.
pub(crate) fn stack() -> &'static mut [u8] {
    vec![0u8; 256].leak()
}

pub(crate) fn leak<T>(value: T) -> &'static T {
    Box::leak(Box::new(value))
}
