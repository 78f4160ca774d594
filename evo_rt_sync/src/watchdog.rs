//! Deadline watchdog for shutdown paths.
//!
//! A teardown that waits on peers (joining threads, draining requests) must
//! not hang the process forever. Arm a [`DeadlineWatchdog`] before the
//! teardown and disarm it after; if the deadline passes first the watchdog
//! logs and runs its escalation, by default exiting with
//! [`ExitCode::FatalFaultDuringExecution`] so the supervisor restarts us.

use crate::signal::BinarySignal;
use crate::thread::ThreadOptions;
use evo_common::state::ExitCode;
use evo_common::status::{RtError, RtResult};
use evo_common::time::Deadline;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error};

/// Runs an escalation unless disarmed before its deadline.
#[derive(Debug)]
pub struct DeadlineWatchdog {
    label: String,
    disarm: Arc<BinarySignal>,
    thread: Option<JoinHandle<bool>>,
}

impl DeadlineWatchdog {
    /// Arm a watchdog that calls `on_expiry` after `timeout`.
    pub fn arm<F>(label: impl Into<String>, timeout: Duration, on_expiry: F) -> RtResult<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let label = label.into();
        let disarm = Arc::new(BinarySignal::new());
        let thread = {
            let disarm = Arc::clone(&disarm);
            let label = label.clone();
            ThreadOptions::named("evo-watchdog").spawn(move || {
                match disarm.wait_until(Deadline::after(timeout)) {
                    Err(RtError::DeadlineExceeded(_)) => {
                        error!(watchdog = %label, ?timeout, "deadline expired, escalating");
                        on_expiry();
                        true
                    }
                    _ => false,
                }
            })?
        };
        debug!(watchdog = %label, ?timeout, "watchdog armed");
        Ok(Self {
            label,
            disarm,
            thread: Some(thread),
        })
    }

    /// Arm a watchdog that exits the process with `code` on expiry.
    pub fn exit_on_expiry(
        label: impl Into<String>,
        timeout: Duration,
        code: ExitCode,
    ) -> RtResult<Self> {
        Self::arm(label, timeout, move || code.exit())
    }

    /// Stop the watchdog and join its thread. Returns promptly unless the
    /// escalation is already running; returns `true` if it had expired.
    pub fn disarm(mut self) -> bool {
        self.stop()
    }

    fn stop(&mut self) -> bool {
        let _ = self.disarm.post();
        let expired = self
            .thread
            .take()
            .map(|t| t.join().unwrap_or(true))
            .unwrap_or(false);
        if !expired {
            debug!(watchdog = %self.label, "watchdog disarmed");
        }
        expired
    }
}

impl Drop for DeadlineWatchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
