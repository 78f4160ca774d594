//! # EVO Hardware Module
//!
//! Lifecycle state machine for hardware modules driven by the EVO RT loop.
//!
//! # Module Structure
//!
//! - [`guard`] - [`TransitionGuard`], the legality table
//! - [`module`] - [`HardwareModule`] trait implemented by concrete drivers
//! - [`request`] - Queued [`AsyncRequest`]s and inline status messages
//! - [`handler`] - [`HardwareModuleHandler`], direct and queued transitions
//! - [`mirror`] - Shared-memory state mirror for other processes
//! - [`triggers`] - Remote-trigger servers and client per module
//! - [`config`] - [`HardwareModuleConfig`] TOML configuration
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐  enable/disable/clear   ┌──────────────────────────┐
//! │ non-RT callers │ ──── AsyncRequest ────► │                          │
//! └────────────────┘      (RingBuffer)       │  HardwareModuleHandler   │
//! ┌────────────────┐  prepare/activate/...   │  state ─► AsyncBuffer ───┼─► health
//! │ state-change   │ ──── direct ──────────► │        ─► ModuleState-   │
//! │ trigger threads│                         │           Mirror (shm)   │
//! └────────────────┘                         └────────────┬─────────────┘
//! ┌────────────────┐  read_status/apply_command           │
//! │ RT loop        │ ─────────────────────────────────────┘
//! └────────────────┘
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod guard;
pub mod handler;
pub mod mirror;
pub mod module;
pub mod request;
pub mod triggers;

pub use config::HardwareModuleConfig;
pub use guard::TransitionGuard;
pub use handler::{HandlerOptions, HardwareModuleHandler, HardwareModuleStatus};
pub use mirror::ModuleStateMirror;
pub use module::HardwareModule;
pub use request::{AsyncRequest, StatusMessage};
pub use triggers::{HardwareModuleClient, HardwareModuleTriggers, ModuleTrigger};
