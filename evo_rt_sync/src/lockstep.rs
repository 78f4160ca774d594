//! Two-party lockstep in shared memory.
//!
//! Party A (the driver, e.g. a hardware module announcing a new cycle) and
//! party B (the follower, e.g. the control loop reacting to it) strictly
//! alternate:
//!
//! ```text
//! start_a → end_a → start_b → end_b → start_a → …
//! ```
//!
//! Each party blocks in `start_*` on its own signal; `end_*` hands the turn to
//! the other party. `cancel` closes both signals so every blocked or future
//! `start_*` returns `Aborted`, and `end_*` becomes a no-op so in-flight work
//! can wind down.

use crate::error::ShmResult;
use crate::manager::{SegmentFdMap, SharedMemoryManager};
use crate::segment::{SegmentRole, ShmPayload, ShmSegment};
use crate::signal::BinarySignal;
use evo_common::consts::LOCKSTEP_RESET_POLL_INTERVAL;
use evo_common::status::{RtError, RtResult};
use evo_common::time::Deadline;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info};

const A_READY: u32 = 0;
const A_RUNNING: u32 = 1;
const B_READY: u32 = 2;
const B_RUNNING: u32 = 3;

/// Shared lockstep state.
#[repr(C)]
pub struct LockstepState {
    phase: AtomicU32,
    cancelled: AtomicU32,
    blocked: AtomicU32,
    a_may_start: BinarySignal,
    b_may_start: BinarySignal,
}

// SAFETY: repr(C), atomics only.
unsafe impl ShmPayload for LockstepState {
    const TYPE_TAG: &'static str = "evo::LockstepState";

    fn initial() -> Self {
        let state = Self {
            phase: AtomicU32::new(A_READY),
            cancelled: AtomicU32::new(0),
            blocked: AtomicU32::new(0),
            a_may_start: BinarySignal::new(),
            b_may_start: BinarySignal::new(),
        };
        let _ = state.a_may_start.post();
        state
    }
}

#[derive(Clone, Copy)]
enum Party {
    A,
    B,
}

impl LockstepState {
    fn signals(&self, party: Party) -> (&BinarySignal, &BinarySignal) {
        match party {
            Party::A => (&self.a_may_start, &self.b_may_start),
            Party::B => (&self.b_may_start, &self.a_may_start),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire) != 0
    }

    fn start(&self, party: Party, deadline: Deadline) -> RtResult<()> {
        let (own, _) = self.signals(party);
        self.blocked.fetch_add(1, Ordering::AcqRel);
        let result = own.wait_until(deadline);
        self.blocked.fetch_sub(1, Ordering::AcqRel);
        match result {
            Ok(()) if self.is_cancelled() => Err(RtError::aborted("lockstep cancelled")),
            Ok(()) => {
                let running = match party {
                    Party::A => A_RUNNING,
                    Party::B => B_RUNNING,
                };
                self.phase.store(running, Ordering::Release);
                Ok(())
            }
            Err(RtError::Cancelled(_)) => Err(RtError::aborted("lockstep cancelled")),
            Err(e) => Err(e),
        }
    }

    fn end(&self, party: Party) -> RtResult<()> {
        if self.is_cancelled() {
            return Ok(());
        }
        let (running, next) = match party {
            Party::A => (A_RUNNING, B_READY),
            Party::B => (B_RUNNING, A_READY),
        };
        self.phase
            .compare_exchange(running, next, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| match party {
                Party::A => RtError::failed_precondition("end_a without matching start_a"),
                Party::B => RtError::failed_precondition("end_b without matching start_b"),
            })?;
        let (_, other) = self.signals(party);
        match other.post() {
            // Cancelled between the check above and the post.
            Err(_) if self.is_cancelled() => Ok(()),
            other => other,
        }
    }

    fn cancel(&self) {
        self.cancelled.store(1, Ordering::Release);
        self.a_may_start.close();
        self.b_may_start.close();
    }

    fn reset(&self, timeout: Duration) -> RtResult<()> {
        if !self.is_cancelled() {
            return Err(RtError::failed_precondition(
                "lockstep reset requires a prior cancel",
            ));
        }
        let deadline = Deadline::after(timeout);
        while self.blocked.load(Ordering::Acquire) > 0 {
            if deadline.has_expired() {
                return Err(RtError::deadline_exceeded(
                    "lockstep party still blocked during reset",
                ));
            }
            std::thread::sleep(LOCKSTEP_RESET_POLL_INTERVAL);
        }
        self.phase.store(A_READY, Ordering::Release);
        self.a_may_start.reopen();
        self.b_may_start.reopen();
        self.cancelled.store(0, Ordering::Release);
        self.a_may_start.post()
    }
}

/// One party's view of a shared lockstep.
///
/// Both parties may use the same instance (e.g. two threads) or separate
/// attachments in different processes.
#[derive(Debug)]
pub struct Lockstep {
    segment: ShmSegment<LockstepState>,
}

impl Lockstep {
    /// Create the shared state in `manager` under `name`.
    pub fn create(manager: &mut SharedMemoryManager, name: &str) -> ShmResult<Self> {
        let segment = manager.add_segment::<LockstepState>(name)?;
        info!(lockstep = name, "lockstep created");
        Ok(Self { segment })
    }

    /// Attach to a lockstep created by another party.
    pub fn attach(fds: &SegmentFdMap, name: &str) -> ShmResult<Self> {
        let segment = fds.attach::<LockstepState>(name, SegmentRole::Writer)?;
        debug!(lockstep = name, "lockstep attached");
        Ok(Self { segment })
    }

    fn state(&self) -> &LockstepState {
        self.segment.get()
    }

    /// Block until A may start. `Aborted` once cancelled,
    /// `DeadlineExceeded` on timeout.
    pub fn start_operation_a(&self, deadline: Deadline) -> RtResult<()> {
        self.state().start(Party::A, deadline)
    }

    /// Finish A and let B start. `FailedPrecondition` if A was not started.
    pub fn end_operation_a(&self) -> RtResult<()> {
        self.state().end(Party::A)
    }

    /// Block until B may start. `Aborted` once cancelled,
    /// `DeadlineExceeded` on timeout.
    pub fn start_operation_b(&self, deadline: Deadline) -> RtResult<()> {
        self.state().start(Party::B, deadline)
    }

    /// Finish B and let A start. `FailedPrecondition` if B was not started.
    pub fn end_operation_b(&self) -> RtResult<()> {
        self.state().end(Party::B)
    }

    /// Abort both parties. Idempotent.
    pub fn cancel(&self) {
        self.state().cancel();
        debug!(lockstep = self.segment.name(), "lockstep cancelled");
    }

    /// Whether [`cancel`](Self::cancel) was called since the last reset.
    pub fn is_cancelled(&self) -> bool {
        self.state().is_cancelled()
    }

    /// Return a cancelled lockstep to "A may start" once neither party is
    /// blocked. `FailedPrecondition` if not cancelled, `DeadlineExceeded`
    /// if a party stays blocked past `timeout`.
    pub fn reset(&self, timeout: Duration) -> RtResult<()> {
        self.state().reset(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lockstep(name: &str) -> (SharedMemoryManager, Lockstep) {
        let mut manager = SharedMemoryManager::new();
        let lockstep = Lockstep::create(&mut manager, name).unwrap();
        (manager, lockstep)
    }

    #[test]
    fn single_round_alternates() {
        let (_manager, lockstep) = lockstep("round");
        assert!(matches!(
            lockstep.start_operation_b(Deadline::now()),
            Err(RtError::DeadlineExceeded(_))
        ));
        lockstep.start_operation_a(Deadline::now()).unwrap();
        assert!(matches!(
            lockstep.end_operation_b(),
            Err(RtError::FailedPrecondition(_))
        ));
        lockstep.end_operation_a().unwrap();
        assert!(matches!(
            lockstep.end_operation_a(),
            Err(RtError::FailedPrecondition(_))
        ));
        lockstep.start_operation_b(Deadline::now()).unwrap();
        lockstep.end_operation_b().unwrap();
        lockstep.start_operation_a(Deadline::now()).unwrap();
    }

    #[test]
    fn cancel_aborts_start_and_relaxes_end() {
        let (_manager, lockstep) = lockstep("cancel");
        lockstep.cancel();
        assert!(matches!(
            lockstep.start_operation_a(Deadline::Infinite),
            Err(RtError::Aborted(_))
        ));
        assert!(lockstep.end_operation_a().is_ok());
        assert!(lockstep.end_operation_b().is_ok());
    }

    #[test]
    fn reset_requires_cancel() {
        let (_manager, lockstep) = lockstep("reset");
        assert!(matches!(
            lockstep.reset(Duration::from_millis(10)),
            Err(RtError::FailedPrecondition(_))
        ));
        lockstep.start_operation_a(Deadline::now()).unwrap();
        lockstep.cancel();
        lockstep.reset(Duration::from_millis(10)).unwrap();
        assert!(!lockstep.is_cancelled());
        lockstep.start_operation_a(Deadline::now()).unwrap();
        lockstep.end_operation_a().unwrap();
    }
}
