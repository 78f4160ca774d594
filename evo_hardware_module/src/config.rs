//! Hardware module process configuration.
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! service_name = "gripper"
//! log_level = "info"
//!
//! [timeouts]
//! statechange_ms = 10000
//! shutdown_watchdog_ms = 5000
//!
//! [threads]
//! rt_priority = 80
//! statechange_priority = 40
//! rt_cpu_affinity = [3]
//!
//! [queue]
//! request_depth = 10
//! ```

use evo_common::config::{ConfigError, SharedConfig, Validate};
use evo_common::consts::{
    ASYNC_REQUEST_QUEUE_DEPTH, CYCLE_TIME_US, RT_THREAD_PRIORITY, SHUTDOWN_WATCHDOG_TIMEOUT,
    STATECHANGE_REQUEST_TIMEOUT, STATECHANGE_THREAD_PRIORITY,
};
use evo_rt_sync::ThreadOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Full configuration of one hardware module process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareModuleConfig {
    /// Common fields; `service_name` names the module.
    pub shared: SharedConfig,
    /// Blocking-call bounds.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    /// Scheduling of the trigger threads.
    #[serde(default)]
    pub threads: ThreadsConfig,
    /// Request queue sizing.
    #[serde(default)]
    pub queue: QueueConfig,
}

/// `[timeouts]` table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    /// How long a queued state change may wait for the RT thread.
    pub statechange_ms: u64,
    /// Grace period of the shutdown watchdog.
    pub shutdown_watchdog_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            statechange_ms: STATECHANGE_REQUEST_TIMEOUT.as_millis() as u64,
            shutdown_watchdog_ms: SHUTDOWN_WATCHDOG_TIMEOUT.as_millis() as u64,
        }
    }
}

impl TimeoutsConfig {
    /// Statechange timeout as a `Duration`.
    pub fn statechange(&self) -> Duration {
        Duration::from_millis(self.statechange_ms)
    }

    /// Shutdown watchdog timeout as a `Duration`.
    pub fn shutdown_watchdog(&self) -> Duration {
        Duration::from_millis(self.shutdown_watchdog_ms)
    }
}

/// `[threads]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadsConfig {
    /// `SCHED_FIFO` priority of the `read_status` / `apply_command` servers.
    pub rt_priority: i32,
    /// `SCHED_FIFO` priority of the state-change servers.
    pub statechange_priority: i32,
    /// CPUs for the RT servers; empty means unpinned.
    pub rt_cpu_affinity: Vec<usize>,
    /// CPUs for the state-change servers; empty means unpinned.
    pub statechange_cpu_affinity: Vec<usize>,
    /// `mlockall` before starting the servers.
    pub lock_memory: bool,
}

impl Default for ThreadsConfig {
    fn default() -> Self {
        Self {
            rt_priority: RT_THREAD_PRIORITY,
            statechange_priority: STATECHANGE_THREAD_PRIORITY,
            rt_cpu_affinity: Vec::new(),
            statechange_cpu_affinity: Vec::new(),
            lock_memory: false,
        }
    }
}

impl ThreadsConfig {
    /// Options for an RT-class trigger thread.
    pub fn rt(&self, name: impl Into<String>) -> ThreadOptions {
        ThreadOptions::named(name)
            .with_priority(self.rt_priority)
            .with_affinity(self.rt_cpu_affinity.clone())
    }

    /// Options for a state-change trigger thread.
    pub fn statechange(&self, name: impl Into<String>) -> ThreadOptions {
        ThreadOptions::named(name)
            .with_priority(self.statechange_priority)
            .with_affinity(self.statechange_cpu_affinity.clone())
    }
}

/// `[queue]` table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Capacity of the async request ring.
    pub request_depth: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            request_depth: ASYNC_REQUEST_QUEUE_DEPTH,
        }
    }
}

impl Validate for HardwareModuleConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        let cycle_ms = CYCLE_TIME_US / 1000;
        if self.timeouts.statechange_ms <= cycle_ms * 10 {
            return Err(ConfigError::ValidationError(format!(
                "timeouts.statechange_ms ({}) must be far above one cycle",
                self.timeouts.statechange_ms
            )));
        }
        if self.timeouts.shutdown_watchdog_ms == 0 {
            return Err(ConfigError::ValidationError(
                "timeouts.shutdown_watchdog_ms must be positive".to_string(),
            ));
        }

        for (key, priority) in [
            ("threads.rt_priority", self.threads.rt_priority),
            ("threads.statechange_priority", self.threads.statechange_priority),
        ] {
            if !(1..=99).contains(&priority) {
                return Err(ConfigError::ValidationError(format!(
                    "{key} ({priority}) outside SCHED_FIFO range 1..=99"
                )));
            }
        }
        if self.threads.statechange_priority >= self.threads.rt_priority {
            return Err(ConfigError::ValidationError(
                "threads.statechange_priority must be below threads.rt_priority".to_string(),
            ));
        }

        if self.queue.request_depth == 0 {
            return Err(ConfigError::ValidationError(
                "queue.request_depth must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
