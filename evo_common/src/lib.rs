//! EVO Common Library
//!
//! Shared vocabulary for the RT synchronization substrate and the hardware
//! module lifecycle built on it.
//!
//! # Module Structure
//!
//! - [`status`] - Status codes and the [`RtError`](status::RtError) taxonomy
//! - [`time`] - Monotonic clock and [`Deadline`](time::Deadline)
//! - [`state`] - Hardware module lifecycle states and process exit codes
//! - [`consts`] - Timeouts, queue depths and layout limits
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use evo_common::prelude::*;
//!
//! fn check(live: HardwareModuleState) -> RtResult<()> {
//!     if live.is_terminal() {
//!         return Err(RtError::failed_precondition("module is latched"));
//!     }
//!     Ok(())
//! }
//! # assert!(check(HardwareModuleState::Deactivated).is_ok());
//! ```

pub mod config;
pub mod consts;
pub mod prelude;
pub mod state;
pub mod status;
pub mod time;
