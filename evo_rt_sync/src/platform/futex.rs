//! Process-shared futex wait/wake.
//!
//! Uses `FUTEX_WAIT` / `FUTEX_WAKE`, never the `_PRIVATE` variants: the
//! private ones hash on the virtual address and silently fail to wake a
//! waiter in another process mapping the same page.

use std::sync::atomic::AtomicU32;
use std::time::Duration;

/// Outcome of a single [`futex_wait`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutexWait {
    /// Woken by a wake call, or spuriously.
    Woken,
    /// The word did not hold the expected value when the call started.
    ValueChanged,
    /// The relative timeout elapsed.
    TimedOut,
    /// Interrupted by a signal handler.
    Interrupted,
}

#[cfg(target_os = "linux")]
const FUTEX_WAIT: libc::c_int = 0;
#[cfg(target_os = "linux")]
const FUTEX_WAKE: libc::c_int = 1;

/// Sleep while `word == expected`, at most `timeout` (`None` waits forever).
#[cfg(target_os = "linux")]
pub fn futex_wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> FutexWait {
    use nix::errno::Errno;
    use std::ptr;

    let ts = timeout.map(|d| libc::timespec {
        tv_sec: d.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    });
    let ts_ptr = ts
        .as_ref()
        .map_or(ptr::null(), |t| t as *const libc::timespec);

    // SAFETY: `word` is a live reference for the duration of the call and
    // the kernel only reads the 32-bit value behind it.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const AtomicU32 as *const u32,
            FUTEX_WAIT,
            expected,
            ts_ptr,
            ptr::null::<u32>(),
            0u32,
        )
    };
    if ret == 0 {
        return FutexWait::Woken;
    }
    match Errno::last() {
        Errno::EAGAIN => FutexWait::ValueChanged,
        Errno::ETIMEDOUT => FutexWait::TimedOut,
        Errno::EINTR => FutexWait::Interrupted,
        _ => FutexWait::Woken,
    }
}

/// Wake up to `count` waiters. Never blocks; safe on the RT path.
#[cfg(target_os = "linux")]
pub fn futex_wake(word: &AtomicU32, count: u32) -> usize {
    use std::ptr;

    let count = count.min(i32::MAX as u32) as libc::c_int;
    // SAFETY: same address contract as `futex_wait`; no memory is written.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const AtomicU32 as *const u32,
            FUTEX_WAKE,
            count,
            ptr::null::<libc::timespec>(),
            ptr::null::<u32>(),
            0u32,
        )
    };
    usize::try_from(ret).unwrap_or(0)
}

// Portable fallback for non-Linux development hosts: bounded sleeps instead
// of kernel wait queues. Callers always re-check the word, so this is correct
// but slow.
/// Sleep while `word == expected`, at most `timeout`.
#[cfg(not(target_os = "linux"))]
pub fn futex_wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> FutexWait {
    use std::sync::atomic::Ordering;

    if word.load(Ordering::Acquire) != expected {
        return FutexWait::ValueChanged;
    }
    let nap = Duration::from_micros(200);
    match timeout {
        Some(t) if t <= nap => {
            std::thread::sleep(t);
            FutexWait::TimedOut
        }
        _ => {
            std::thread::sleep(nap);
            FutexWait::Woken
        }
    }
}

/// No-op: fallback waiters poll.
#[cfg(not(target_os = "linux"))]
pub fn futex_wake(_word: &AtomicU32, _count: u32) -> usize {
    0
}

/// Wake every waiter.
#[inline]
pub fn futex_wake_all(word: &AtomicU32) -> usize {
    futex_wake(word, u32::MAX)
}
