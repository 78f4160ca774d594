//! Cross-process remote triggers.
//!
//! A trigger named `n` is a pair of shared-memory [`TriggerSlot`]s,
//! `n_request` and `n_response`, each a [`BinarySignal`] plus a sequence
//! number. The server waits for a request, runs its callback, and posts the
//! response. Clients attach through a [`SegmentFdMap`] and either block on
//! the response ([`RemoteTriggerClient::trigger`]) or keep a
//! [`TriggerHandle`] to wait later.
//!
//! Every request takes the next sequence number and the server echoes the
//! newest number it had seen when its callback started. A waiter only
//! completes on a response that covers its own number, so a late response
//! to an abandoned request never completes a newer one. Requests posted
//! before the server picks any of them up coalesce into one callback run,
//! which still starts after each of them was posted.

use crate::manager::{SegmentFdMap, SharedMemoryManager};
use crate::segment::{SegmentRole, ShmPayload, ShmSegment};
use crate::signal::BinarySignal;
use crate::thread::ThreadOptions;
use evo_common::consts::TRIGGER_POLL_INTERVAL;
use evo_common::status::{RtError, RtResult};
use evo_common::time::Deadline;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Segment name carrying requests for trigger `name`.
pub fn request_segment_name(name: &str) -> String {
    format!("{name}_request")
}

/// Segment name carrying responses for trigger `name`.
pub fn response_segment_name(name: &str) -> String {
    format!("{name}_response")
}

/// Work run by a server for each request.
pub type TriggerCallback = Box<dyn FnMut() + Send>;

/// One direction of a trigger: a signal plus the sequence number it carries.
#[repr(C)]
#[derive(Debug)]
pub struct TriggerSlot {
    signal: BinarySignal,
    sequence: AtomicU64,
}

// SAFETY: repr(C), atomics only.
unsafe impl ShmPayload for TriggerSlot {
    const TYPE_TAG: &'static str = "evo::TriggerSlot";

    fn initial() -> Self {
        Self {
            signal: BinarySignal::new(),
            sequence: AtomicU64::new(0),
        }
    }
}

impl TriggerSlot {
    /// The slot's signal.
    pub fn signal(&self) -> &BinarySignal {
        &self.signal
    }

    /// Last sequence number published in this slot.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Acquire)
    }
}

// ─── Server ─────────────────────────────────────────────────────────

/// Owns a trigger's segments and serves requests with a callback.
pub struct RemoteTriggerServer {
    name: String,
    request: ShmSegment<TriggerSlot>,
    response: ShmSegment<TriggerSlot>,
    callback: TriggerCallback,
}

impl RemoteTriggerServer {
    /// Create the request/response segments in `manager`.
    pub fn new(
        manager: &mut SharedMemoryManager,
        name: &str,
        callback: impl FnMut() + Send + 'static,
    ) -> RtResult<Self> {
        let request = manager.add_segment::<TriggerSlot>(&request_segment_name(name))?;
        let response = manager.add_segment::<TriggerSlot>(&response_segment_name(name))?;
        debug!(trigger = name, "remote trigger server created");
        Ok(Self {
            name: name.to_string(),
            request,
            response,
            callback: Box::new(callback),
        })
    }

    /// Trigger name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serve at most one request.
    ///
    /// `DeadlineExceeded` if none arrived by `deadline`, `Cancelled` once the
    /// server has been stopped.
    pub fn query(&mut self, deadline: Deadline) -> RtResult<()> {
        let request = self.request.get();
        request.signal.wait_until(deadline)?;
        let sequence = request.sequence();
        trace!(trigger = %self.name, sequence, "serving request");
        (self.callback)();
        let response = self.response.get();
        response.sequence.fetch_max(sequence, Ordering::AcqRel);
        response.signal.post()
    }

    /// Run [`query`](Self::query) in a loop on a thread configured by `options`.
    pub fn start(self, options: ThreadOptions) -> RtResult<RunningTriggerServer> {
        self.request.get().signal.reopen();
        self.response.get().signal.reopen();
        let name = self.name.clone();
        let running = Arc::new(AtomicBool::new(true));
        let thread = {
            let running = Arc::clone(&running);
            let mut server = self;
            options.spawn(move || {
                while running.load(Ordering::Acquire) {
                    match server.query(Deadline::after(TRIGGER_POLL_INTERVAL)) {
                        Ok(()) | Err(RtError::DeadlineExceeded(_)) => {}
                        Err(RtError::Cancelled(_)) => break,
                        Err(e) => {
                            warn!(trigger = %server.name, "query failed: {}", e);
                            break;
                        }
                    }
                }
                server
            })?
        };
        info!(trigger = %name, thread = %options.name, priority = ?options.priority, "trigger server started");
        Ok(RunningTriggerServer {
            name,
            running,
            thread: Some(thread),
        })
    }

    fn close(&self) {
        self.request.get().signal.close();
        self.response.get().signal.close();
    }
}

impl fmt::Debug for RemoteTriggerServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTriggerServer")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A server running on its own thread. Stops on drop.
pub struct RunningTriggerServer {
    name: String,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<RemoteTriggerServer>>,
}

impl RunningTriggerServer {
    /// Trigger name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the loop, fail pending and future client requests with
    /// `Cancelled`, and hand the server back.
    pub fn stop(&mut self) -> Option<RemoteTriggerServer> {
        self.running.store(false, Ordering::Release);
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(server) => {
                server.close();
                info!(trigger = %self.name, "trigger server stopped");
                Some(server)
            }
            Err(_) => {
                warn!(trigger = %self.name, "trigger server thread panicked");
                None
            }
        }
    }
}

impl Drop for RunningTriggerServer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

// ─── Client ─────────────────────────────────────────────────────────

struct Endpoints {
    request: ShmSegment<TriggerSlot>,
    response: ShmSegment<TriggerSlot>,
}

/// Invokes a remote trigger.
pub struct RemoteTriggerClient {
    name: String,
    endpoints: Option<Arc<Endpoints>>,
    in_flight: Arc<AtomicBool>,
}

impl RemoteTriggerClient {
    /// Unconnected client for trigger `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoints: None,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Trigger name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach to the server's segments. `InvalidArgument` if they are not in
    /// `fds` or do not hold trigger slots.
    pub fn connect(&mut self, fds: &SegmentFdMap) -> RtResult<()> {
        let request = fds
            .attach::<TriggerSlot>(&request_segment_name(&self.name), SegmentRole::Writer)
            .map_err(RtError::from)?;
        let response = fds
            .attach::<TriggerSlot>(&response_segment_name(&self.name), SegmentRole::Reader)
            .map_err(RtError::from)?;
        self.endpoints = Some(Arc::new(Endpoints { request, response }));
        debug!(trigger = %self.name, "remote trigger client connected");
        Ok(())
    }

    /// Whether [`connect`](Self::connect) succeeded.
    pub fn is_connected(&self) -> bool {
        self.endpoints.is_some()
    }

    /// Whether a request from this client is outstanding.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Invoke the trigger and block until it has run or `deadline` passes.
    ///
    /// `InvalidArgument` if not connected, `AlreadyExists` if a request is
    /// outstanding, `DeadlineExceeded` on timeout, `Cancelled` if the server
    /// stopped.
    pub fn trigger(&self, deadline: Deadline) -> RtResult<()> {
        self.trigger_async()?.wait_until(deadline)
    }

    /// Invoke the trigger without waiting.
    pub fn trigger_async(&self) -> RtResult<TriggerHandle> {
        let endpoints = self
            .endpoints
            .as_ref()
            .ok_or_else(|| RtError::invalid_argument("trigger client not connected"))?;
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(RtError::already_exists("trigger request already in flight"));
        }
        let request = endpoints.request.get();
        let sequence = request.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let handle = TriggerHandle {
            endpoints: Arc::clone(endpoints),
            in_flight: Arc::clone(&self.in_flight),
            sequence,
            finished: false,
        };
        request.signal.post()?;
        trace!(trigger = %self.name, sequence, "request posted");
        Ok(handle)
    }
}

impl fmt::Debug for RemoteTriggerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTriggerClient")
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .field("in_flight", &self.is_in_flight())
            .finish()
    }
}

/// An outstanding trigger request. Clears the client's in-flight flag when
/// it completes or is dropped.
pub struct TriggerHandle {
    endpoints: Arc<Endpoints>,
    in_flight: Arc<AtomicBool>,
    sequence: u64,
    finished: bool,
}

impl TriggerHandle {
    /// Wait for the response to this request. Responses to older requests
    /// are consumed and skipped.
    pub fn wait_until(&mut self, deadline: Deadline) -> RtResult<()> {
        if self.finished {
            return Ok(());
        }
        let response = self.endpoints.response.get();
        loop {
            response.signal.wait_until(deadline)?;
            let answered = response.sequence();
            if answered >= self.sequence {
                break;
            }
            trace!(answered, expected = self.sequence, "skipping stale response");
        }
        self.finished = true;
        self.in_flight.store(false, Ordering::Release);
        Ok(())
    }

    /// Sequence number of this request.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Whether the response has been received.
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for TriggerHandle {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

impl fmt::Debug for TriggerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerHandle")
            .field("sequence", &self.sequence)
            .field("finished", &self.finished)
            .finish()
    }
}
