//! Prelude module for common re-exports.
//!
//! `use evo_common::prelude::*;` pulls in the status taxonomy, deadlines,
//! lifecycle states and configuration types used by every EVO crate.

// ─── Status ─────────────────────────────────────────────────────────
pub use crate::status::{RtError, RtResult, StatusCode};

// ─── Time ───────────────────────────────────────────────────────────
pub use crate::time::{Deadline, monotonic_ns};

// ─── Lifecycle ──────────────────────────────────────────────────────
pub use crate::state::{ExitCode, HardwareModuleState};

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{
    ASYNC_REQUEST_QUEUE_DEPTH, HANDOFF_DETACH_TIMEOUT, STATECHANGE_REQUEST_TIMEOUT,
};
