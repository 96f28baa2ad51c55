pub(crate) mod assembly;
mod connection;
pub(crate) mod streams;

pub use connection::{Config, Connection, Multiplexer, Role};
pub use streams::StreamStats;

pub(crate) use connection::Inner;

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

pub type WindowSize = u32;

pub type PingPayload = [u8; 8];

/// Largest legal flow-control window: 2^31 - 1.
pub const MAX_WINDOW_SIZE: WindowSize = (1 << 31) - 1;

/// Cap on the cumulative pre-HPACK size of a header block under assembly.
pub const MAX_HEADER_BUFFER_SIZE: usize = 400 * 1024;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Waits on `cond`, bounded by an optional absolute deadline. Returns the
/// re-acquired guard and whether the deadline has elapsed; the caller
/// re-checks its condition before treating the elapse as a timeout.
pub(crate) fn wait_on<'a, T>(
    cond: &Condvar,
    guard: MutexGuard<'a, T>,
    deadline: Option<Instant>,
) -> (MutexGuard<'a, T>, bool) {
    match deadline {
        None => (
            cond.wait(guard).unwrap_or_else(PoisonError::into_inner),
            false,
        ),
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline {
                return (guard, true);
            }

            let (guard, result) = cond
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            (guard, result.timed_out())
        }
    }
}
