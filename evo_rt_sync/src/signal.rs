//! Process-shared binary signal.
//!
//! A single futex word with three states. [`BinarySignal::post`] is a CAS plus
//! a non-blocking wake and is safe on the RT path; waiting is for non-RT code.
//! The struct is `repr(C)` and pointer-free, so it can live inside a shared
//! memory segment and be used from several processes at once.
//!
//! ```text
//!            post()               wait/try_wait
//!   EMPTY ───────────► READY ───────────────────► EMPTY
//!     │                  │
//!     └──── close() ─────┴──► CLOSED ── reopen() ──► EMPTY
//! ```

use crate::platform::{futex_wait, futex_wake_all};
use crate::segment::ShmPayload;
use evo_common::status::{RtError, RtResult};
use evo_common::time::Deadline;
use std::sync::atomic::{AtomicU32, Ordering};

const EMPTY: u32 = 0;
const READY: u32 = 1;
const CLOSED: u32 = 2;

/// Binary semaphore usable across threads and processes.
///
/// Posting an already-ready signal is a no-op, so repeated posts without a
/// matching wait collapse into one.
#[repr(C)]
#[derive(Debug)]
pub struct BinarySignal {
    word: AtomicU32,
}

impl Default for BinarySignal {
    fn default() -> Self {
        Self::new()
    }
}

impl BinarySignal {
    /// New signal in the empty state.
    pub const fn new() -> Self {
        Self {
            word: AtomicU32::new(EMPTY),
        }
    }

    /// Mark the signal ready and wake waiters. Never blocks.
    ///
    /// Returns `Cancelled` once the signal has been closed.
    pub fn post(&self) -> RtResult<()> {
        match self
            .word
            .compare_exchange(EMPTY, READY, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                futex_wake_all(&self.word);
                Ok(())
            }
            Err(READY) => Ok(()),
            Err(_) => Err(RtError::cancelled("signal closed")),
        }
    }

    /// Consume a pending post without blocking.
    ///
    /// `Ok(true)` if a post was consumed, `Ok(false)` if none was pending,
    /// `Cancelled` if closed.
    pub fn try_wait(&self) -> RtResult<bool> {
        match self
            .word
            .compare_exchange(READY, EMPTY, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(true),
            Err(CLOSED) => Err(RtError::cancelled("signal closed")),
            Err(_) => Ok(false),
        }
    }

    /// Block until a post is consumed, the signal is closed (`Cancelled`),
    /// or `deadline` passes (`DeadlineExceeded`). Non-RT only.
    pub fn wait_until(&self, deadline: Deadline) -> RtResult<()> {
        loop {
            if self.try_wait()? {
                return Ok(());
            }
            let timeout = match deadline.remaining() {
                Some(left) if left.is_zero() => {
                    return Err(RtError::deadline_exceeded("signal wait timed out"));
                }
                left => left,
            };
            futex_wait(&self.word, EMPTY, timeout);
        }
    }

    /// Close the signal: current and future waiters get `Cancelled`.
    /// Idempotent.
    pub fn close(&self) {
        if self.word.swap(CLOSED, Ordering::AcqRel) != CLOSED {
            futex_wake_all(&self.word);
        }
    }

    /// Return a closed signal to the empty state. No-op if not closed.
    pub fn reopen(&self) {
        let _ = self
            .word
            .compare_exchange(CLOSED, EMPTY, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Whether [`close`](Self::close) has been called since the last reopen.
    pub fn is_closed(&self) -> bool {
        self.word.load(Ordering::Acquire) == CLOSED
    }

    /// Whether a post is pending.
    pub fn is_ready(&self) -> bool {
        self.word.load(Ordering::Acquire) == READY
    }
}

// SAFETY: repr(C), a single atomic word, no pointers.
unsafe impl ShmPayload for BinarySignal {
    const TYPE_TAG: &'static str = "evo::BinarySignal";

    fn initial() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn post_then_try_wait_consumes_once() {
        let signal = BinarySignal::new();
        assert_eq!(signal.try_wait(), Ok(false));
        signal.post().unwrap();
        signal.post().unwrap();
        assert!(signal.is_ready());
        assert_eq!(signal.try_wait(), Ok(true));
        assert_eq!(signal.try_wait(), Ok(false));
    }

    #[test]
    fn wait_until_times_out() {
        let signal = BinarySignal::new();
        let start = Instant::now();
        let result = signal.wait_until(Deadline::after(Duration::from_millis(20)));
        assert!(matches!(result, Err(RtError::DeadlineExceeded(_))));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn expired_deadline_still_consumes_pending_post() {
        let signal = BinarySignal::new();
        signal.post().unwrap();
        assert_eq!(signal.wait_until(Deadline::now()), Ok(()));
    }

    #[test]
    fn post_wakes_blocked_waiter() {
        let signal = Arc::new(BinarySignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait_until(Deadline::Infinite))
        };
        thread::sleep(Duration::from_millis(10));
        signal.post().unwrap();
        assert_eq!(waiter.join().unwrap(), Ok(()));
    }

    #[test]
    fn close_wakes_waiter_with_cancelled() {
        let signal = Arc::new(BinarySignal::new());
        let waiter = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || signal.wait_until(Deadline::Infinite))
        };
        thread::sleep(Duration::from_millis(10));
        signal.close();
        assert!(matches!(waiter.join().unwrap(), Err(RtError::Cancelled(_))));
        assert!(matches!(signal.post(), Err(RtError::Cancelled(_))));
    }

    #[test]
    fn reopen_restores_empty_state() {
        let signal = BinarySignal::new();
        signal.close();
        signal.close();
        assert!(signal.is_closed());
        signal.reopen();
        assert_eq!(signal.try_wait(), Ok(false));
        signal.post().unwrap();
        assert_eq!(signal.try_wait(), Ok(true));
    }
}
