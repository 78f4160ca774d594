//! Thread spawning with RT scheduling.
//!
//! RT setup is best effort: without `CAP_SYS_NICE` the thread still runs,
//! under the default policy, and a warning is logged once per thread.

use crate::platform::{current_thread_is_rt, set_current_thread_affinity, set_current_thread_fifo};
use evo_common::status::{RtError, RtResult};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Name, policy and placement of a spawned thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThreadOptions {
    /// Thread name (truncated to 15 bytes by the kernel).
    pub name: String,
    /// `SCHED_FIFO` priority; `None` keeps the inherited policy.
    pub priority: Option<i32>,
    /// CPUs to pin to; empty keeps the inherited mask.
    pub cpu_affinity: Vec<usize>,
}

impl ThreadOptions {
    /// Options with just a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the `SCHED_FIFO` priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Pin to the given CPUs.
    pub fn with_affinity(mut self, cpus: impl Into<Vec<usize>>) -> Self {
        self.cpu_affinity = cpus.into();
        self
    }

    /// Apply priority and affinity to the calling thread.
    pub fn apply_to_current(&self) {
        if let Some(priority) = self.priority {
            match set_current_thread_fifo(priority) {
                Ok(()) => debug!(
                    thread = %self.name,
                    priority,
                    rt = current_thread_is_rt(),
                    "SCHED_FIFO enabled"
                ),
                Err(e) => warn!(
                    thread = %self.name,
                    priority,
                    "SCHED_FIFO unavailable ({}), running with default policy",
                    e
                ),
            }
        }
        if !self.cpu_affinity.is_empty() {
            if let Err(e) = set_current_thread_affinity(&self.cpu_affinity) {
                warn!(thread = %self.name, cpus = ?self.cpu_affinity, "CPU pinning failed: {}", e);
            }
        }
    }

    /// Spawn `body` on a new thread configured by these options.
    pub fn spawn<F, R>(&self, body: F) -> RtResult<JoinHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let options = self.clone();
        thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                options.apply_to_current();
                body()
            })
            .map_err(|e| RtError::resource_exhausted(format!("spawn '{}': {}", self.name, e)))
    }
}
