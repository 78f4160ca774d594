//! Queued lifecycle transitions against a hand-driven RT cycle.

mod common;

use common::{Probe, activated_handler, wait_for_pending};
use evo_common::state::{ExitCode, HardwareModuleState};
use evo_common::status::RtError;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Without an RT cycle the request is never applied: the caller gets
/// `DeadlineExceeded` after the statechange timeout, the state stays put,
/// and a later cycle drops the abandoned request.
#[test]
fn enable_motion_times_out_without_rt_cycle() {
    let (handler, probe) = activated_handler("idle", Duration::from_millis(100));

    let start = Instant::now();
    let result = handler.on_enable_motion();
    assert!(matches!(result, Err(RtError::DeadlineExceeded(_))));
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(handler.state(), HardwareModuleState::Activated);

    handler.read_status().expect("cycle");
    assert_eq!(handler.state(), HardwareModuleState::Activated);
    assert_eq!(handler.pending_requests(), 0);
    assert_eq!(Probe::count(&probe.enabled), 0);
}

/// One RT cycle carries `Activated -> MotionEnabling -> MotionEnabled`,
/// fires `enabled` once and releases the caller with `Ok`.
#[test]
fn enable_motion_completes_in_one_cycle() {
    let (handler, probe) = activated_handler("enable", Duration::from_secs(5));

    let caller = {
        let handler = Arc::clone(&handler);
        thread::spawn(move || handler.on_enable_motion())
    };
    wait_for_pending(&handler, 1);

    handler.read_status().expect("cycle");
    assert_eq!(handler.state(), HardwareModuleState::MotionEnabled);
    caller.join().expect("caller").expect("enable motion");
    assert_eq!(Probe::count(&probe.enabled), 1);

    // The enabling cycle does not command the hardware.
    handler.apply_command().expect("apply");
    assert_eq!(Probe::count(&probe.apply_command), 0);

    handler.read_status().expect("cycle");
    handler.apply_command().expect("apply");
    assert_eq!(Probe::count(&probe.apply_command), 1);
    assert_eq!(Probe::count(&probe.enabled), 1);
}

/// An `Aborted` command error latches `FatallyFaulted`, cancels queued
/// requests, and rejects further enables.
#[test]
fn aborted_command_is_fatal() {
    let (handler, probe) = activated_handler("fatal", Duration::from_secs(5));
    handler
        .set_state_directly(HardwareModuleState::MotionEnabling, "test")
        .expect("enabling");
    handler
        .set_state_directly(HardwareModuleState::MotionEnabled, "test")
        .expect("enabled");
    handler.read_status().expect("enabling cycle");
    handler.read_status().expect("cycle");

    let queued = {
        let handler = Arc::clone(&handler);
        thread::spawn(move || handler.on_disable_motion())
    };
    wait_for_pending(&handler, 1);

    *probe.apply_error.lock() = Some(RtError::aborted("amplifier bus lost"));
    assert!(matches!(handler.apply_command(), Err(RtError::Aborted(_))));
    assert_eq!(handler.state(), HardwareModuleState::FatallyFaulted);
    assert!(matches!(
        queued.join().expect("caller"),
        Err(RtError::Cancelled(_))
    ));
    assert_eq!(handler.pending_requests(), 0);

    assert!(matches!(
        handler.on_enable_motion(),
        Err(RtError::FailedPrecondition(_))
    ));
    let status = handler.get_hardware_module_state();
    assert_eq!(status.state, HardwareModuleState::FatallyFaulted);
    assert!(status.fault_message.contains("amplifier bus lost"));
    assert_eq!(handler.exit_code(), ExitCode::FatalFaultDuringExecution);
    assert_eq!(Probe::count(&probe.disabled), 1);
}

/// A request whose `from` no longer matches the live state is cancelled
/// without effect.
#[test]
fn request_with_diverged_from_is_cancelled() {
    let (handler, _probe) = activated_handler("diverged", Duration::from_secs(5));

    let caller = {
        let handler = Arc::clone(&handler);
        thread::spawn(move || handler.on_enable_motion())
    };
    wait_for_pending(&handler, 1);
    handler
        .set_state_directly(HardwareModuleState::Faulted, "encoder glitch")
        .expect("fault");

    handler.read_status().expect("cycle");
    assert!(matches!(
        caller.join().expect("caller"),
        Err(RtError::Cancelled(_))
    ));
    assert_eq!(handler.state(), HardwareModuleState::Faulted);
}

/// A request older than the last state write is cancelled even when the
/// state has come back to its `from`.
#[test]
fn request_older_than_last_update_is_cancelled() {
    let (handler, _probe) = activated_handler("older", Duration::from_secs(5));
    handler
        .set_state_directly(HardwareModuleState::Faulted, "first fault")
        .expect("fault");

    let caller = {
        let handler = Arc::clone(&handler);
        thread::spawn(move || handler.on_clear_faults())
    };
    wait_for_pending(&handler, 1);
    handler
        .set_state_directly(HardwareModuleState::ClearingFaults, "operator")
        .expect("clearing");
    handler
        .set_state_directly(HardwareModuleState::Faulted, "second fault")
        .expect("fault again");

    handler.read_status().expect("cycle");
    assert!(matches!(
        caller.join().expect("caller"),
        Err(RtError::Cancelled(_))
    ));
    assert_eq!(handler.state(), HardwareModuleState::Faulted);
}

/// Two requests queued from the same state are applied in order; the
/// second goes stale once the first changes the state.
#[test]
fn first_request_wins_for_same_from() {
    let (handler, probe) = activated_handler("fifo", Duration::from_secs(5));

    let enable = {
        let handler = Arc::clone(&handler);
        thread::spawn(move || {
            handler.set_state_and_wait(HardwareModuleState::MotionEnabling, "enable")
        })
    };
    wait_for_pending(&handler, 1);
    let deactivate = {
        let handler = Arc::clone(&handler);
        thread::spawn(move || {
            handler.set_state_and_wait(HardwareModuleState::Deactivating, "deactivate")
        })
    };
    wait_for_pending(&handler, 2);

    handler.read_status().expect("first cycle");
    enable.join().expect("enable").expect("enable applied");
    assert_eq!(handler.state(), HardwareModuleState::MotionEnabled);

    handler.read_status().expect("second cycle");
    assert!(matches!(
        deactivate.join().expect("deactivate"),
        Err(RtError::Cancelled(_))
    ));
    assert_eq!(handler.state(), HardwareModuleState::MotionEnabled);
    assert_eq!(Probe::count(&probe.enabled), 1);
}

/// Faults clear through the queue and land back in `Activated`.
#[test]
fn clear_faults_returns_to_activated() {
    let (handler, _probe) = activated_handler("clear", Duration::from_secs(5));
    handler
        .set_state_directly(HardwareModuleState::Faulted, "limit switch")
        .expect("fault");
    assert_eq!(
        handler.get_hardware_module_state().fault_message.as_str(),
        "limit switch"
    );

    let caller = {
        let handler = Arc::clone(&handler);
        thread::spawn(move || handler.on_clear_faults())
    };
    wait_for_pending(&handler, 1);
    handler.read_status().expect("cycle");
    caller.join().expect("caller").expect("clear faults");

    assert_eq!(handler.state(), HardwareModuleState::Activated);
    let status = handler.get_hardware_module_state();
    assert_eq!(status.state, HardwareModuleState::Activated);
    assert!(status.fault_message.is_empty());
}

/// The request queue is bounded.
#[test]
fn full_queue_is_resource_exhausted() {
    let (handler, _probe) = activated_handler("full", Duration::from_secs(5));
    let depth = handler.options().request_depth;

    let callers: Vec<_> = (0..depth)
        .map(|_| {
            let handler = Arc::clone(&handler);
            thread::spawn(move || handler.on_enable_motion())
        })
        .collect();
    wait_for_pending(&handler, depth);

    assert!(matches!(
        handler.on_enable_motion(),
        Err(RtError::ResourceExhausted(_))
    ));

    // One request per cycle: the first applies, the rest go stale.
    for _ in 0..depth {
        handler.read_status().expect("cycle");
    }
    let results: Vec<_> = callers
        .into_iter()
        .map(|c| c.join().expect("caller"))
        .collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter(|r| r.is_err())
            .all(|r| matches!(r, Err(RtError::Cancelled(_))))
    );
    handler.shutdown().expect("shutdown");
}
