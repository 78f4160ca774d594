//! Lifecycle handler wrapping a [`HardwareModule`].
//!
//! The handler owns the canonical lifecycle state. There are two ways to
//! change it:
//!
//! - **Direct**: [`set_state_directly`](HardwareModuleHandler::set_state_directly)
//!   and the `on_prepare` / `on_activate` / `on_deactivate` operations, which
//!   by contract never overlap the RT loop.
//! - **Queued**: [`set_state_and_wait`](HardwareModuleHandler::set_state_and_wait)
//!   and the `on_enable_motion` / `on_disable_motion` / `on_clear_faults`
//!   operations. The caller enqueues an [`AsyncRequest`] and blocks; the RT
//!   thread applies at most one request per cycle at the start of
//!   [`read_status`](HardwareModuleHandler::read_status).
//!
//! # RT Cycle
//!
//! ```text
//! read_status:   drain ≤1 request → module.read_status → progress
//!                MotionEnabling / MotionDisabling / ClearingFaults →
//!                fire `enabled` if MotionEnabled was just entered → publish
//! apply_command: skipped in the enabling cycle, fault outside MotionEnabled
//! ```
//!
//! Every module error becomes `Faulted`, or `FatallyFaulted` for `Aborted`,
//! and cancels all queued requests.

use crate::config::HardwareModuleConfig;
use crate::guard::TransitionGuard;
use crate::mirror::{ModuleStateMirror, mirror_segment_name};
use crate::module::HardwareModule;
use crate::request::{AsyncRequest, StatusMessage, status_message};
use evo_common::consts::{
    ASYNC_REQUEST_QUEUE_DEPTH, SHUTDOWN_WATCHDOG_TIMEOUT, STATECHANGE_REQUEST_TIMEOUT,
};
use evo_common::state::{ExitCode, HardwareModuleState};
use evo_common::status::{RtError, RtResult};
use evo_common::time::{Deadline, monotonic_ns};
use evo_rt_sync::{
    AsyncBuffer, DeadlineWatchdog, RingBuffer, SharedMemoryManager, ShmSegment, one_shot,
};
use parking_lot::Mutex;
use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use HardwareModuleState::*;

/// Tunables of a [`HardwareModuleHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerOptions {
    /// How long a queued state change waits for the RT thread.
    pub statechange_timeout: Duration,
    /// Grace period before a hung shutdown exits the process.
    pub shutdown_timeout: Duration,
    /// Capacity of the request queue.
    pub request_depth: usize,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            statechange_timeout: STATECHANGE_REQUEST_TIMEOUT,
            shutdown_timeout: SHUTDOWN_WATCHDOG_TIMEOUT,
            request_depth: ASYNC_REQUEST_QUEUE_DEPTH,
        }
    }
}

impl From<&HardwareModuleConfig> for HandlerOptions {
    fn from(config: &HardwareModuleConfig) -> Self {
        Self {
            statechange_timeout: config.timeouts.statechange(),
            shutdown_timeout: config.timeouts.shutdown_watchdog(),
            request_depth: config.queue.request_depth,
        }
    }
}

/// Snapshot served to non-RT readers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardwareModuleStatus {
    /// Lifecycle state.
    pub state: HardwareModuleState,
    /// Reason of the latched fault; empty outside fault states.
    pub fault_message: StatusMessage,
    /// RT cycles seen so far.
    pub cycle: u64,
}

/// Everything the RT thread mutates, behind one lock that RT paths only
/// ever `try_lock`.
struct Core {
    module: Box<dyn HardwareModule>,
    back: HardwareModuleStatus,
}

/// Lifecycle state machine around one hardware module.
///
/// Share it behind an `Arc`: the RT loop, the state-change trigger threads
/// and any number of non-RT callers use the same instance.
pub struct HardwareModuleHandler {
    name: String,
    options: HandlerOptions,
    core: Mutex<Core>,
    state: AtomicU8,
    last_update_ns: AtomicI64,
    cycle: AtomicU64,
    enabled_pending: AtomicBool,
    enabling_cycle: AtomicBool,
    requests: RingBuffer<AsyncRequest>,
    submit_lock: Mutex<()>,
    actions_in_flight: AtomicU32,
    status: AsyncBuffer<HardwareModuleStatus>,
    mirror: Option<ShmSegment<ModuleStateMirror>>,
}

/// Lifecycle call run by a direct transition.
type ModuleAction = fn(&mut Box<dyn HardwareModule>) -> RtResult<()>;

/// Counts an on_* operation for the destruction check.
struct InFlight<'a>(&'a AtomicU32);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicU32) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

const fn fault_state_for(error: &RtError) -> HardwareModuleState {
    match error {
        RtError::Aborted(_) => FatallyFaulted,
        _ => Faulted,
    }
}

/// States in which the module talks to hardware every cycle.
const fn is_communicating(state: HardwareModuleState) -> bool {
    matches!(
        state,
        Activated | MotionEnabling | MotionEnabled | MotionDisabling | Faulted | ClearingFaults
    )
}

impl HardwareModuleHandler {
    /// Wrap `module`, starting in `Deactivated`.
    pub fn new(
        name: impl Into<String>,
        module: impl HardwareModule + 'static,
        options: HandlerOptions,
    ) -> Self {
        let name = name.into();
        debug!(module = %name, ?options, "hardware module handler created");
        Self {
            name,
            core: Mutex::new(Core {
                module: Box::new(module),
                back: HardwareModuleStatus::default(),
            }),
            state: AtomicU8::new(Deactivated.as_u8()),
            last_update_ns: AtomicI64::new(0),
            cycle: AtomicU64::new(0),
            enabled_pending: AtomicBool::new(false),
            enabling_cycle: AtomicBool::new(false),
            requests: RingBuffer::new(options.request_depth.max(1)),
            submit_lock: Mutex::new(()),
            actions_in_flight: AtomicU32::new(0),
            status: AsyncBuffer::new(HardwareModuleStatus::default()),
            mirror: None,
            options,
        }
    }

    /// Publish the state to a `<name>_state` segment in `manager`.
    pub fn with_mirror(mut self, manager: &mut SharedMemoryManager) -> RtResult<Self> {
        let segment =
            manager.add_segment::<ModuleStateMirror>(&mirror_segment_name(&self.name))?;
        segment.get().store_state(self.state());
        self.mirror = Some(segment);
        Ok(self)
    }

    /// Module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handler tunables.
    pub fn options(&self) -> &HandlerOptions {
        &self.options
    }

    /// Live state, as last written.
    pub fn state(&self) -> HardwareModuleState {
        HardwareModuleState::from_u8(self.state.load(Ordering::Acquire)).unwrap_or(FatallyFaulted)
    }

    /// RT cycles seen so far.
    pub fn cycle_count(&self) -> u64 {
        self.cycle.load(Ordering::Acquire)
    }

    /// Requests queued and not yet drained by the RT thread.
    pub fn pending_requests(&self) -> usize {
        self.requests.size()
    }

    /// State and fault message for the health surface.
    pub fn get_hardware_module_state(&self) -> HardwareModuleStatus {
        self.status.get()
    }

    /// Process exit code matching the latched state.
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::for_state(self.state())
    }

    // ─── State Writes ───────────────────────────────────────────────

    /// Write `to` without going through the queue. Only valid while the RT
    /// loop is not running.
    ///
    /// `FailedPrecondition` if the guard prohibits the transition.
    pub fn set_state_directly(&self, to: HardwareModuleState, message: &str) -> RtResult<()> {
        let mut core = self.core.lock();
        let result = self.write_state(&mut core, to, message).map(|_| ());
        self.publish(&core, true);
        result
    }

    /// Queue `to` for the RT thread and wait until it is applied.
    ///
    /// `FailedPrecondition` if the guard prohibits the transition now or
    /// when the RT thread applies it, `ResourceExhausted` if the queue is
    /// full, `Cancelled` if the request went stale or the module faulted,
    /// `DeadlineExceeded` if the RT thread did not apply it in time.
    pub fn set_state_and_wait(&self, to: HardwareModuleState, message: &str) -> RtResult<()> {
        let timestamp_ns = monotonic_ns();
        let from = self.state();
        match TransitionGuard::classify(from, to) {
            TransitionGuard::NoOp => {
                debug!(module = %self.name, %from, %to, "transition is a no-op");
                return Ok(());
            }
            TransitionGuard::Prohibited => {
                warn!(module = %self.name, %from, %to, "transition prohibited");
                return Err(RtError::failed_precondition(format!(
                    "transition {from} -> {to} is prohibited"
                )));
            }
            TransitionGuard::Allowed => {}
        }

        let (promise, mut future) = one_shot::<RtResult<()>>()?;
        {
            let _submit = self.submit_lock.lock();
            let mut slot = self
                .requests
                .prepare_insert()
                .ok_or_else(|| RtError::resource_exhausted("state change queue is full"))?;
            *slot = AsyncRequest {
                from,
                to,
                message: status_message(message),
                timestamp_ns,
                promise,
            };
            slot.finish_insert();
        }
        debug!(module = %self.name, %from, %to, "state change queued");

        match future.wait_until(Deadline::after(self.options.statechange_timeout)) {
            Ok(()) => future.get().and_then(|outcome| outcome),
            Err(e) => {
                warn!(module = %self.name, %from, %to, "state change not applied: {}", e);
                Err(e)
            }
        }
    }

    /// Guarded state write shared by the direct and RT paths. Returns
    /// whether the state changed.
    fn write_state(
        &self,
        core: &mut Core,
        to: HardwareModuleState,
        message: &str,
    ) -> RtResult<bool> {
        let from = self.state();
        match TransitionGuard::classify(from, to) {
            TransitionGuard::NoOp => return Ok(false),
            TransitionGuard::Prohibited => {
                // Reachable from the RT thread; keep the error allocation free.
                warn!(module = %self.name, %from, %to, "transition prohibited");
                return Err(RtError::failed_precondition(
                    "transition prohibited by the lifecycle guard",
                ));
            }
            TransitionGuard::Allowed => {}
        }

        let mut target = to;
        let mut reason = status_message(message);
        if from == MotionEnabled {
            if let Err(e) = core.module.disabled() {
                error!(module = %self.name, "disabled hook failed: {}", e);
                // Never replace a fault that is already on its way in.
                if !target.is_fault() {
                    target = fault_state_for(&e);
                    reason.clear();
                    let _ = write!(reason, "disabled hook failed: {e}");
                }
            }
        }

        self.state.store(target.as_u8(), Ordering::Release);
        self.last_update_ns.store(monotonic_ns(), Ordering::Release);
        if target == MotionEnabled {
            self.enabled_pending.store(true, Ordering::Release);
        }
        if let Some(mirror) = &self.mirror {
            mirror.get().store_state(target);
        }

        core.back.state = target;
        if target.is_fault() {
            core.back.fault_message = reason;
            error!(module = %self.name, %from, to = %target, reason = %core.back.fault_message, "module faulted");
        } else {
            core.back.fault_message.clear();
            info!(module = %self.name, %from, to = %target, "state change");
        }
        Ok(true)
    }

    /// Latch the fault matching `error` and cancel every queued request.
    fn fault(&self, core: &mut Core, error: &RtError, operation: &str) {
        let mut reason = StatusMessage::new();
        let _ = write!(reason, "{operation} failed: {error}");
        // A terminal state refuses the write; the first fault reason stays.
        let _ = self.write_state(core, fault_state_for(error), &reason);
        self.cancel_pending();
    }

    fn publish(&self, core: &Core, blocking: bool) {
        let mut snapshot = core.back.clone();
        if blocking {
            self.status.commit(&mut snapshot);
        } else {
            // Skipped while a reader holds the front; the next cycle retries.
            let _ = self.status.try_commit(&mut snapshot);
        }
    }

    /// Fail every queued request with `Cancelled`.
    ///
    /// Runs on the RT thread. A popped request frees its handoff context
    /// only when its caller already dropped the future, so a fault frees at
    /// most `request_depth` contexts.
    fn cancel_pending(&self) {
        let mut cancelled = 0usize;
        while let Some(request) = self.requests.pop() {
            request.promise.cancel();
            cancelled += 1;
        }
        if cancelled > 0 {
            warn!(module = %self.name, cancelled, "queued state changes cancelled");
        }
    }

    /// Apply the oldest queued request, if any.
    fn drain_one(&self, core: &mut Core) {
        let Some(front) = self.requests.front() else {
            return;
        };
        let mut request = front.move_front();
        if request.promise.is_cancelled() {
            // The caller gave up waiting.
            debug!(module = %self.name, to = %request.to, "abandoned request dropped");
            return;
        }

        let live = self.state();
        let outcome = if request.from != live
            || request.timestamp_ns < self.last_update_ns.load(Ordering::Acquire)
        {
            warn!(module = %self.name, from = %request.from, %live, to = %request.to, "stale request rejected");
            Err(RtError::cancelled("state changed since the request was made"))
        } else {
            self.write_state(core, request.to, &request.message)
                .map(|_| ())
        };
        let _ = request.promise.set(outcome);
    }

    // ─── RT Cycle ───────────────────────────────────────────────────

    /// Start-of-cycle work on the RT thread. Never blocks.
    ///
    /// `Unavailable` if a direct transition holds the module; otherwise
    /// the first module error of this cycle, already latched as a fault.
    pub fn read_status(&self) -> RtResult<()> {
        let Some(mut core) = self.core.try_lock() else {
            return Err(RtError::unavailable("module busy with a direct transition"));
        };
        let cycle = self.cycle.fetch_add(1, Ordering::AcqRel) + 1;
        self.enabling_cycle.store(false, Ordering::Release);

        self.drain_one(&mut core);

        let mut outcome = Ok(());
        if is_communicating(self.state()) {
            if let Err(e) = core.module.read_status() {
                self.fault(&mut core, &e, "read_status");
                outcome = Err(e);
            }
        }

        if outcome.is_ok() {
            let step = match self.state() {
                MotionEnabling => Some((core.module.enable_motion(), MotionEnabled, "enable_motion")),
                MotionDisabling => Some((core.module.disable_motion(), Activated, "disable_motion")),
                ClearingFaults => Some((core.module.clear_faults(), Activated, "clear_faults")),
                _ => None,
            };
            if let Some((result, next, operation)) = step {
                match result {
                    Ok(()) => {
                        let _ = self.write_state(&mut core, next, operation);
                    }
                    Err(e) => {
                        self.fault(&mut core, &e, operation);
                        outcome = Err(e);
                    }
                }
            }
        }

        if self.enabled_pending.swap(false, Ordering::AcqRel) && self.state() == MotionEnabled {
            match core.module.enabled() {
                Ok(()) => self.enabling_cycle.store(true, Ordering::Release),
                Err(e) => {
                    self.fault(&mut core, &e, "enabled hook");
                    if outcome.is_ok() {
                        outcome = Err(e);
                    }
                }
            }
        }

        core.back.cycle = cycle;
        if let Some(mirror) = &self.mirror {
            mirror.get().store_cycle(cycle);
            mirror.header().touch(cycle);
        }
        self.publish(&core, false);
        outcome
    }

    /// End-of-cycle work on the RT thread. Never blocks.
    ///
    /// Does nothing in the cycle that entered `MotionEnabled`. Outside
    /// `MotionEnabled` it latches `Faulted` and returns
    /// `FailedPrecondition`.
    pub fn apply_command(&self) -> RtResult<()> {
        let Some(mut core) = self.core.try_lock() else {
            return Err(RtError::unavailable("module busy with a direct transition"));
        };
        self.apply_command_locked(&mut core)
    }

    /// [`apply_command`](Self::apply_command) that does nothing unless the
    /// module is `MotionEnabled`. Returns whether the command was applied.
    ///
    /// The state is checked under the same lock every transition takes, so
    /// no transition can land between the check and the module call.
    pub fn apply_command_if_motion_enabled(&self) -> RtResult<bool> {
        let Some(mut core) = self.core.try_lock() else {
            return Err(RtError::unavailable("module busy with a direct transition"));
        };
        if self.state() != MotionEnabled || self.enabling_cycle.load(Ordering::Acquire) {
            return Ok(false);
        }
        self.apply_command_locked(&mut core).map(|()| true)
    }

    fn apply_command_locked(&self, core: &mut Core) -> RtResult<()> {
        if self.enabling_cycle.load(Ordering::Acquire) {
            return Ok(());
        }

        let state = self.state();
        let result = if state == MotionEnabled {
            core.module.apply_command()
        } else {
            error!(module = %self.name, %state, "apply_command outside MOTION_ENABLED");
            Err(RtError::failed_precondition(
                "apply_command called while motion is not enabled",
            ))
        };
        if let Err(e) = &result {
            self.fault(core, e, "apply_command");
            self.publish(core, false);
        }
        result
    }

    // ─── Lifecycle Operations ───────────────────────────────────────

    /// Run a direct `through -> done` transition around `action`; on error
    /// move to `failed(error)`.
    fn direct_transition(
        &self,
        through: HardwareModuleState,
        done: HardwareModuleState,
        action: ModuleAction,
        failed: fn(&RtError) -> HardwareModuleState,
        operation: &str,
    ) -> RtResult<()> {
        let _in_flight = InFlight::enter(&self.actions_in_flight);
        let mut core = self.core.lock();
        let result = self.direct_transition_locked(&mut core, through, done, action, failed, operation);
        self.publish(&core, true);
        result
    }

    fn direct_transition_locked(
        &self,
        core: &mut Core,
        through: HardwareModuleState,
        done: HardwareModuleState,
        action: ModuleAction,
        failed: fn(&RtError) -> HardwareModuleState,
        operation: &str,
    ) -> RtResult<()> {
        let live = self.state();
        if live == done {
            return Ok(());
        }
        if !self.write_state(core, through, operation)? {
            return Ok(());
        }
        match action(&mut core.module) {
            Ok(()) => self.write_state(core, done, operation).map(|_| ()),
            Err(e) => {
                let mut reason = StatusMessage::new();
                let _ = write!(reason, "{operation} failed: {e}");
                let _ = self.write_state(core, failed(&e), &reason);
                self.cancel_pending();
                Err(e)
            }
        }
    }

    /// `Deactivated -> Preparing -> Prepared`; failures are `InitFailed`.
    pub fn on_prepare(&self) -> RtResult<()> {
        self.direct_transition(
            Preparing,
            Prepared,
            |m| m.prepare(),
            |_| InitFailed,
            "prepare",
        )
    }

    /// `Prepared -> Activating -> Activated`.
    pub fn on_activate(&self) -> RtResult<()> {
        self.direct_transition(
            Activating,
            Activated,
            |m| m.activate(),
            fault_state_for,
            "activate",
        )
    }

    /// `* -> Deactivating -> Deactivated`.
    pub fn on_deactivate(&self) -> RtResult<()> {
        self.direct_transition(
            Deactivating,
            Deactivated,
            |m| m.deactivate(),
            fault_state_for,
            "deactivate",
        )
    }

    /// Queue `Activated -> MotionEnabling`; the RT thread finishes it.
    pub fn on_enable_motion(&self) -> RtResult<()> {
        let _in_flight = InFlight::enter(&self.actions_in_flight);
        self.set_state_and_wait(MotionEnabling, "enable motion")
    }

    /// Queue `MotionEnabled -> MotionDisabling`; the RT thread finishes it.
    pub fn on_disable_motion(&self) -> RtResult<()> {
        let _in_flight = InFlight::enter(&self.actions_in_flight);
        self.set_state_and_wait(MotionDisabling, "disable motion")
    }

    /// Queue `Faulted -> ClearingFaults`; the RT thread finishes it.
    pub fn on_clear_faults(&self) -> RtResult<()> {
        let _in_flight = InFlight::enter(&self.actions_in_flight);
        self.set_state_and_wait(ClearingFaults, "clear faults")
    }

    /// Cancel queued requests and deactivate, under a watchdog that exits
    /// with [`ExitCode::FatalFaultDuringExecution`] if this hangs. Call
    /// after the RT loop has stopped.
    pub fn shutdown(&self) -> RtResult<()> {
        let watchdog = DeadlineWatchdog::exit_on_expiry(
            format!("{} shutdown", self.name),
            self.options.shutdown_timeout,
            ExitCode::FatalFaultDuringExecution,
        )?;
        let _in_flight = InFlight::enter(&self.actions_in_flight);
        let result = {
            let mut core = self.core.lock();
            self.cancel_pending();
            let state = self.state();
            let result = if state == Deactivated || state.is_terminal() {
                Ok(())
            } else {
                self.direct_transition_locked(
                    &mut core,
                    Deactivating,
                    Deactivated,
                    |m| m.deactivate(),
                    fault_state_for,
                    "deactivate",
                )
            };
            self.publish(&core, true);
            result
        };
        watchdog.disarm();
        info!(module = %self.name, state = %self.state(), "hardware module shut down");
        result
    }
}

impl Drop for HardwareModuleHandler {
    fn drop(&mut self) {
        self.cancel_pending();
        let in_flight = self.actions_in_flight.load(Ordering::Acquire);
        assert_eq!(
            in_flight, 0,
            "bug: hardware module '{}' dropped with {} action(s) in flight",
            self.name, in_flight
        );
    }
}

impl fmt::Debug for HardwareModuleHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareModuleHandler")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("cycle", &self.cycle_count())
            .field("pending_requests", &self.pending_requests())
            .finish_non_exhaustive()
    }
}
