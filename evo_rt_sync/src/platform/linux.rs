//! Linux-specific system calls: anonymous shared memory, scheduling policy,
//! CPU affinity and memory locking.

use crate::error::{ShmError, ShmResult};
use nix::sched::{CpuSet, sched_setaffinity};
use nix::sys::mman::{MlockAllFlags, mlockall};
use nix::unistd::Pid;
use std::ffi::CString;
use std::os::fd::{FromRawFd, OwnedFd};

/// Create an anonymous, fd-backed shared memory file named `name`.
///
/// The name is only a debugging label (visible in `/proc/<pid>/fd`); other
/// processes reach the memory through the descriptor.
pub fn memfd_create(name: &str) -> ShmResult<OwnedFd> {
    let c_name = CString::new(name).map_err(|_| ShmError::InvalidName {
        name: name.to_string(),
        reason: "contains NUL",
    })?;
    // SAFETY: `c_name` is a valid NUL-terminated string for the call.
    let fd = unsafe { libc::memfd_create(c_name.as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(ShmError::Nix {
            source: nix::Error::last(),
        });
    }
    // SAFETY: `fd` was just returned by memfd_create and is owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Switch the calling thread to `SCHED_FIFO` at `priority`.
///
/// Needs `CAP_SYS_NICE` or an rtprio rlimit.
pub fn set_current_thread_fifo(priority: i32) -> nix::Result<()> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `pthread_self` is always valid for the calling thread and
    // `param` outlives the call.
    let ret =
        unsafe { libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) };
    if ret == 0 {
        Ok(())
    } else {
        Err(nix::Error::from_raw(ret))
    }
}

/// Pin the calling thread to the given CPUs.
pub fn set_current_thread_affinity(cpus: &[usize]) -> nix::Result<()> {
    let mut set = CpuSet::new();
    for &cpu in cpus {
        set.set(cpu)?;
    }
    sched_setaffinity(Pid::from_raw(0), &set)
}

/// Lock all current and future pages into RAM so RT code never page-faults.
pub fn lock_memory() -> nix::Result<()> {
    mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE)
}

/// Whether the calling thread runs under a real-time scheduling policy.
pub fn current_thread_is_rt() -> bool {
    // SAFETY: sched_getscheduler(0) only queries the calling thread.
    let policy = unsafe { libc::sched_getscheduler(0) };
    policy == libc::SCHED_FIFO || policy == libc::SCHED_RR
}
