//! Single-slot value handoff between an RT producer and a consumer.
//!
//! A [`HandoffContext`] holds at most one pending value. The producing side
//! attaches a [`Promise`], the consuming side a [`Future`]; each role can be
//! attached at most once at a time.
//!
//! | Operation | RT-safe | Blocks |
//! |-----------|---------|--------|
//! | `Promise::set` | yes | never |
//! | `Future::get` / `Future::peek` | yes | never |
//! | `cancel` (either side) | yes | never |
//! | `Future::wait_until` / `wait_for` | no | until value, cancel or deadline |
//! | `HandoffContext::reset` | no | until both sides detach |
//! | dropping an owning handle | no | up to [`HANDOFF_DETACH_TIMEOUT`] |
//!
//! RT operations only ever `try_read` the reset lock; a reset in progress
//! therefore shows up as `Cancelled` instead of blocking the RT thread.

use crate::ring_buffer::RingBuffer;
use crate::signal::BinarySignal;
use evo_common::consts::HANDOFF_DETACH_TIMEOUT;
use evo_common::status::{RtError, RtResult};
use evo_common::time::Deadline;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error};

/// Whether a handle detaches itself after one successful `set` / `get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Usage {
    /// Detach after the first value.
    #[default]
    OneShot,
    /// Stay attached for repeated values.
    Reusable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Promise,
    Future,
}

impl Role {
    const fn peer(self) -> Self {
        match self {
            Self::Promise => Self::Future,
            Self::Future => Self::Promise,
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Promise => "promise",
            Self::Future => "future",
        }
    }
}

// ─── Context ────────────────────────────────────────────────────────

/// Shared state between one [`Promise`] and one [`Future`].
pub struct HandoffContext<T> {
    slot: RingBuffer<Option<T>>,
    promise_attached: AtomicBool,
    future_attached: AtomicBool,
    cancelled: AtomicBool,
    value_ready: BinarySignal,
    promise_detached: BinarySignal,
    future_detached: BinarySignal,
    reset_lock: RwLock<()>,
}

impl<T: Send> HandoffContext<T> {
    /// New external context with no handle attached.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: RingBuffer::new(1),
            promise_attached: AtomicBool::new(false),
            future_attached: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            value_ready: BinarySignal::new(),
            promise_detached: BinarySignal::new(),
            future_detached: BinarySignal::new(),
            reset_lock: RwLock::new(()),
        })
    }

    /// Attach the producing side.
    ///
    /// `AlreadyExists` if a promise is attached, `ResourceExhausted` while a
    /// reset runs.
    pub fn get_promise(self: &Arc<Self>, usage: Usage) -> RtResult<Promise<T>> {
        self.attach(Role::Promise)?;
        Ok(Promise(Handle::attached(Arc::clone(self), Role::Promise, usage, false)))
    }

    /// Attach the consuming side.
    ///
    /// `AlreadyExists` if a future is attached, `ResourceExhausted` while a
    /// reset runs.
    pub fn get_future(self: &Arc<Self>, usage: Usage) -> RtResult<Future<T>> {
        self.attach(Role::Future)?;
        Ok(Future(Handle::attached(Arc::clone(self), Role::Future, usage, false)))
    }

    /// Cancel the exchange and wake any waiter. Idempotent.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            // Closed signals report Cancelled to waiters anyway.
            let _ = self.value_ready.post();
        }
    }

    /// Whether either side cancelled since the last reset.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Whether a value is pending.
    pub fn has_value(&self) -> bool {
        !self.slot.is_empty()
    }

    /// Whether a promise is attached.
    pub fn promise_attached(&self) -> bool {
        self.is_attached(Role::Promise)
    }

    /// Whether a future is attached.
    pub fn future_attached(&self) -> bool {
        self.is_attached(Role::Future)
    }

    /// Recycle a cancelled context for a new exchange.
    ///
    /// Waits up to `timeout` for both sides to detach, then drops any pending
    /// value and clears the cancellation. `FailedPrecondition` if not
    /// cancelled, `ResourceExhausted` if another reset holds the lock,
    /// `DeadlineExceeded` if a side stays attached.
    pub fn reset(&self, timeout: Duration) -> RtResult<()> {
        if !self.is_cancelled() {
            return Err(RtError::failed_precondition(
                "handoff reset requires a prior cancel",
            ));
        }
        let deadline = Deadline::after(timeout);
        let _exclusive = self
            .reset_lock
            .try_write_for(timeout)
            .ok_or_else(|| RtError::resource_exhausted("handoff reset already in progress"))?;

        self.wait_detached(Role::Promise, deadline)?;
        self.wait_detached(Role::Future, deadline)?;

        self.slot.clear();
        let _ = self.value_ready.try_wait();
        let _ = self.promise_detached.try_wait();
        let _ = self.future_detached.try_wait();
        self.cancelled.store(false, Ordering::Release);
        debug!("handoff context reset");
        Ok(())
    }

    fn attached_flag(&self, role: Role) -> &AtomicBool {
        match role {
            Role::Promise => &self.promise_attached,
            Role::Future => &self.future_attached,
        }
    }

    fn detached_signal(&self, role: Role) -> &BinarySignal {
        match role {
            Role::Promise => &self.promise_detached,
            Role::Future => &self.future_detached,
        }
    }

    fn is_attached(&self, role: Role) -> bool {
        self.attached_flag(role).load(Ordering::Acquire)
    }

    fn attach(&self, role: Role) -> RtResult<()> {
        let _shared = self
            .reset_lock
            .try_read()
            .ok_or_else(|| RtError::resource_exhausted("handoff reset in progress"))?;
        self.attached_flag(role)
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| match role {
                Role::Promise => RtError::already_exists("promise already attached"),
                Role::Future => RtError::already_exists("future already attached"),
            })
    }

    fn detach(&self, role: Role) {
        if self.attached_flag(role).swap(false, Ordering::AcqRel) {
            let _ = self.detached_signal(role).post();
        }
    }

    fn wait_detached(&self, role: Role, deadline: Deadline) -> RtResult<()> {
        while self.is_attached(role) {
            self.detached_signal(role).wait_until(deadline)?;
        }
        Ok(())
    }
}

impl<T> fmt::Debug for HandoffContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoffContext")
            .field("promise_attached", &self.promise_attached.load(Ordering::Relaxed))
            .field("future_attached", &self.future_attached.load(Ordering::Relaxed))
            .field("cancelled", &self.cancelled.load(Ordering::Relaxed))
            .field("pending", &!self.slot.is_empty())
            .finish()
    }
}

// ─── Handles ────────────────────────────────────────────────────────

struct Handle<T: Send> {
    context: Option<Arc<HandoffContext<T>>>,
    role: Role,
    usage: Usage,
    attached: bool,
    owns_context: bool,
}

impl<T: Send> Handle<T> {
    const fn detached(role: Role) -> Self {
        Self {
            context: None,
            role,
            usage: Usage::OneShot,
            attached: false,
            owns_context: false,
        }
    }

    fn attached(context: Arc<HandoffContext<T>>, role: Role, usage: Usage, owns: bool) -> Self {
        Self {
            context: Some(context),
            role,
            usage,
            attached: true,
            owns_context: owns,
        }
    }

    fn owning(role: Role, usage: Usage) -> Self {
        let context = HandoffContext::new();
        context.attached_flag(role).store(true, Ordering::Release);
        Self::attached(context, role, usage, true)
    }

    fn context(&self) -> RtResult<&Arc<HandoffContext<T>>> {
        match &self.context {
            Some(context) if self.attached => Ok(context),
            _ => Err(RtError::failed_precondition(match self.role {
                Role::Promise => "promise not attached",
                Role::Future => "future not attached",
            })),
        }
    }

    fn attach_peer(&self, usage: Usage) -> RtResult<Handle<T>> {
        let context = self.context()?;
        let peer = self.role.peer();
        context.attach(peer)?;
        Ok(Handle::attached(Arc::clone(context), peer, usage, false))
    }

    fn detach(&mut self) {
        if self.attached {
            self.attached = false;
            if let Some(context) = &self.context {
                context.detach(self.role);
            }
        }
    }

    fn detach_after_use(&mut self) {
        if self.usage == Usage::OneShot {
            self.detach();
        }
    }

    fn cancel(&self) {
        if let Some(context) = &self.context {
            context.cancel();
        }
    }

    fn is_cancelled(&self) -> bool {
        self.context.as_ref().is_none_or(|c| c.is_cancelled())
    }
}

impl<T: Send> Drop for Handle<T> {
    fn drop(&mut self) {
        let Some(context) = self.context.take() else {
            return;
        };
        if self.attached {
            // A side that leaves without finishing breaks the exchange.
            context.cancel();
            self.attached = false;
            context.detach(self.role);
        }
        if self.owns_context && context.is_attached(self.role.peer()) {
            let deadline = Deadline::after(HANDOFF_DETACH_TIMEOUT);
            if context.wait_detached(self.role.peer(), deadline).is_err() {
                error!(
                    "bug: {} still attached {:?} after owning {} was dropped",
                    self.role.peer().name(),
                    HANDOFF_DETACH_TIMEOUT,
                    self.role.name()
                );
            }
        }
    }
}

/// Producing side of a handoff.
///
/// `Default` yields a detached handle without a context; it never allocates.
pub struct Promise<T: Send>(Handle<T>);

impl<T: Send> Default for Promise<T> {
    fn default() -> Self {
        Self(Handle::detached(Role::Promise))
    }
}

impl<T: Send> Promise<T> {
    /// New promise owning a fresh context.
    pub fn new(usage: Usage) -> Self {
        Self(Handle::owning(Role::Promise, usage))
    }

    /// Attach a future to this promise's context.
    pub fn get_future(&self, usage: Usage) -> RtResult<Future<T>> {
        self.0.attach_peer(usage).map(Future)
    }

    /// Publish `value`. RT-safe, never blocks.
    ///
    /// `FailedPrecondition` if detached, `Cancelled` if cancelled or a reset
    /// is running, `ResourceExhausted` if a value is still pending.
    pub fn set(&mut self, value: T) -> RtResult<()> {
        {
            let context = self.0.context()?;
            let _shared = context
                .reset_lock
                .try_read()
                .ok_or_else(|| RtError::cancelled("handoff reset in progress"))?;
            if context.is_cancelled() {
                return Err(RtError::cancelled("handoff cancelled"));
            }
            let mut slot = context
                .slot
                .prepare_insert()
                .ok_or_else(|| RtError::resource_exhausted("handoff value already pending"))?;
            *slot = Some(value);
            slot.finish_insert();
            let _ = context.value_ready.post();
        }
        self.0.detach_after_use();
        Ok(())
    }

    /// Cancel the exchange; wakes the future's waiter.
    pub fn cancel(&self) {
        self.0.cancel();
    }

    /// Whether the exchange was cancelled. Detached handles report `true`.
    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Whether this handle is attached to a context.
    pub fn is_attached(&self) -> bool {
        self.0.attached
    }

    /// Detach without cancelling.
    pub fn detach(&mut self) {
        self.0.detach();
    }
}

impl<T: Send> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("attached", &self.0.attached)
            .field("usage", &self.0.usage)
            .finish()
    }
}

/// Consuming side of a handoff.
///
/// `Default` yields a detached handle without a context.
pub struct Future<T: Send>(Handle<T>);

impl<T: Send> Default for Future<T> {
    fn default() -> Self {
        Self(Handle::detached(Role::Future))
    }
}

impl<T: Send> Future<T> {
    /// New future owning a fresh context.
    pub fn new(usage: Usage) -> Self {
        Self(Handle::owning(Role::Future, usage))
    }

    /// Attach a promise to this future's context.
    pub fn get_promise(&self, usage: Usage) -> RtResult<Promise<T>> {
        self.0.attach_peer(usage).map(Promise)
    }

    /// Take the pending value. RT-safe, never blocks.
    ///
    /// `FailedPrecondition` if detached, `Cancelled` if cancelled or a reset
    /// is running, `Unavailable` if nothing is pending.
    pub fn get(&mut self) -> RtResult<T> {
        let value = {
            let context = self.0.context()?;
            let _shared = context
                .reset_lock
                .try_read()
                .ok_or_else(|| RtError::cancelled("handoff reset in progress"))?;
            if context.is_cancelled() {
                return Err(RtError::cancelled("handoff cancelled"));
            }
            context
                .slot
                .pop()
                .flatten()
                .ok_or_else(|| RtError::unavailable("no value ready"))?
        };
        self.0.detach_after_use();
        Ok(value)
    }

    /// Copy the pending value with `copy` without consuming it.
    pub fn peek(&self, copy: impl FnOnce(&T) -> T) -> RtResult<T> {
        let context = self.0.context()?;
        let _shared = context
            .reset_lock
            .try_read()
            .ok_or_else(|| RtError::cancelled("handoff reset in progress"))?;
        if context.is_cancelled() {
            return Err(RtError::cancelled("handoff cancelled"));
        }
        let front = context
            .slot
            .front()
            .ok_or_else(|| RtError::unavailable("no value ready"))?;
        front
            .as_ref()
            .map(copy)
            .ok_or_else(|| RtError::unavailable("no value ready"))
    }

    /// Block until a value is pending. Non-RT only.
    ///
    /// `Cancelled` if either side cancels, `DeadlineExceeded` on timeout.
    pub fn wait_until(&self, deadline: Deadline) -> RtResult<()> {
        let context = self.0.context()?;
        loop {
            if context.is_cancelled() {
                return Err(RtError::cancelled("handoff cancelled"));
            }
            if context.has_value() {
                return Ok(());
            }
            if let Err(err) = context.value_ready.wait_until(deadline) {
                if context.is_cancelled() {
                    return Err(RtError::cancelled("handoff cancelled"));
                }
                return Err(err);
            }
        }
    }

    /// [`wait_until`](Self::wait_until) with a relative timeout.
    pub fn wait_for(&self, timeout: Duration) -> RtResult<()> {
        self.wait_until(Deadline::after(timeout))
    }

    /// Cancel the exchange; later `set` calls fail with `Cancelled`.
    pub fn cancel(&self) {
        self.0.cancel();
    }

    /// Whether the exchange was cancelled. Detached handles report `true`.
    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Whether this handle is attached to a context.
    pub fn is_attached(&self) -> bool {
        self.0.attached
    }

    /// Detach without cancelling.
    pub fn detach(&mut self) {
        self.0.detach();
    }
}

impl<T: Send> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("attached", &self.0.attached)
            .field("usage", &self.0.usage)
            .finish()
    }
}

/// Create a one-shot pair sharing a fresh external context.
pub fn one_shot<T: Send>() -> RtResult<(Promise<T>, Future<T>)> {
    let context = HandoffContext::new();
    let promise = context.get_promise(Usage::OneShot)?;
    let future = context.get_future(Usage::OneShot)?;
    Ok((promise, future))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn set_then_get_detaches_one_shot_handles() {
        let (mut promise, mut future) = one_shot::<u32>().unwrap();
        promise.set(7).unwrap();
        assert!(!promise.is_attached());
        assert_eq!(future.get(), Ok(7));
        assert!(!future.is_attached());
        assert!(matches!(future.get(), Err(RtError::FailedPrecondition(_))));
        assert!(matches!(promise.set(8), Err(RtError::FailedPrecondition(_))));
    }

    #[test]
    fn get_before_set_is_unavailable() {
        let (_promise, mut future) = one_shot::<u32>().unwrap();
        assert!(matches!(future.get(), Err(RtError::Unavailable(_))));
    }

    #[test]
    fn second_set_without_get_is_resource_exhausted() {
        let context = HandoffContext::<u32>::new();
        let mut promise = context.get_promise(Usage::Reusable).unwrap();
        let mut future = context.get_future(Usage::Reusable).unwrap();
        promise.set(1).unwrap();
        assert!(matches!(promise.set(2), Err(RtError::ResourceExhausted(_))));
        assert_eq!(future.get(), Ok(1));
        promise.set(3).unwrap();
        assert_eq!(future.get(), Ok(3));
    }

    #[test]
    fn roles_attach_at_most_once() {
        let context = HandoffContext::<u8>::new();
        let promise = context.get_promise(Usage::OneShot).unwrap();
        let _future = context.get_future(Usage::OneShot).unwrap();
        assert!(matches!(
            context.get_promise(Usage::OneShot),
            Err(RtError::AlreadyExists(_))
        ));
        assert!(matches!(
            context.get_future(Usage::OneShot),
            Err(RtError::AlreadyExists(_))
        ));
        assert!(matches!(
            promise.get_future(Usage::OneShot),
            Err(RtError::AlreadyExists(_))
        ));
    }

    #[test]
    fn peek_copies_without_consuming() {
        let (mut promise, mut future) = one_shot::<String>().unwrap();
        promise.set("ready".to_string()).unwrap();
        assert_eq!(future.peek(|s| s.clone()).unwrap(), "ready");
        assert_eq!(future.get().unwrap(), "ready");
    }

    #[test]
    fn cancel_wakes_infinite_waiter() {
        let context = HandoffContext::<u32>::new();
        let promise = context.get_promise(Usage::OneShot).unwrap();
        let future = context.get_future(Usage::OneShot).unwrap();
        let waiter = thread::spawn(move || {
            let start = Instant::now();
            (future.wait_until(Deadline::Infinite), start.elapsed())
        });
        thread::sleep(Duration::from_millis(20));
        promise.cancel();
        let (result, _) = waiter.join().unwrap();
        assert!(matches!(result, Err(RtError::Cancelled(_))));
    }

    #[test]
    fn wait_for_times_out() {
        let (_promise, future) = one_shot::<u32>().unwrap();
        assert!(matches!(
            future.wait_for(Duration::from_millis(10)),
            Err(RtError::DeadlineExceeded(_))
        ));
    }

    #[test]
    fn dropping_future_cancels_producer() {
        let (mut promise, future) = one_shot::<u32>().unwrap();
        drop(future);
        assert!(promise.is_cancelled());
        assert!(matches!(promise.set(1), Err(RtError::Cancelled(_))));
    }

    #[test]
    fn reset_requires_cancel_and_detach() {
        let context = HandoffContext::<u32>::new();
        let mut promise = context.get_promise(Usage::Reusable).unwrap();
        assert!(matches!(
            context.reset(Duration::from_millis(10)),
            Err(RtError::FailedPrecondition(_))
        ));
        promise.cancel();
        assert!(matches!(
            context.reset(Duration::from_millis(10)),
            Err(RtError::DeadlineExceeded(_))
        ));
        promise.detach();
        context.reset(Duration::from_millis(10)).unwrap();
        assert!(!context.is_cancelled());

        let (mut promise, mut future) = (
            context.get_promise(Usage::OneShot).unwrap(),
            context.get_future(Usage::OneShot).unwrap(),
        );
        promise.set(5).unwrap();
        assert_eq!(future.get(), Ok(5));
    }

    #[test]
    fn owning_future_waits_for_promise_detach() {
        let future = Future::<u32>::new(Usage::OneShot);
        let mut promise = future.get_promise(Usage::OneShot).unwrap();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            let _ = promise.set(1);
        });
        let start = Instant::now();
        drop(future);
        assert!(start.elapsed() < HANDOFF_DETACH_TIMEOUT);
        producer.join().unwrap();
    }

    #[test]
    fn default_handles_are_detached() {
        let mut promise = Promise::<u32>::default();
        assert!(!promise.is_attached());
        assert!(promise.is_cancelled());
        assert!(matches!(promise.set(1), Err(RtError::FailedPrecondition(_))));
        assert!(matches!(
            Future::<u32>::default().wait_for(Duration::ZERO),
            Err(RtError::FailedPrecondition(_))
        ));
    }
}
