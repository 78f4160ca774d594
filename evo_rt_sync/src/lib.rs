//! # EVO RT Sync
//!
//! Synchronization primitives for exchanging commands, cycle signals and
//! results between a hard real-time control loop and non-real-time
//! management code, inside one process and across processes through shared
//! memory.
//!
//! ## Building Blocks
//!
//! | Primitive | RT side | Non-RT side |
//! |-----------|---------|-------------|
//! | [`BinarySignal`] | `post`, `try_wait` | `wait_until`, `close` |
//! | [`RingBuffer`] | `prepare_insert`, `front` | same |
//! | [`Promise`] / [`Future`] | `set`, `get`, `peek`, `cancel` | `wait_until`, `reset` |
//! | [`RemoteTriggerServer`] / [`RemoteTriggerClient`] | callback on server thread | `trigger`, `trigger_async` |
//! | [`Lockstep`] | `end_operation_*` | `start_operation_*`, `reset` |
//! | [`AsyncBuffer`] | `try_commit` | `get` |
//!
//! RT-side operations never block, never allocate, and never take a lock
//! that a non-RT thread may hold; contention turns into an error result.
//!
//! ## Shared Memory
//!
//! Segments are `memfd` files laid out as `[SegmentHeader][payload]`. The
//! creating process owns them through a [`SharedMemoryManager`]; peers receive
//! a [`SegmentFdMap`] and attach by name.
//!
//! ```rust,no_run
//! use evo_rt_sync::{Lockstep, SharedMemoryManager};
//! use evo_common::time::Deadline;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut manager = SharedMemoryManager::new();
//! let driver = Lockstep::create(&mut manager, "gripper_cycle")?;
//! let follower = Lockstep::attach(&manager.fd_map(), "gripper_cycle")?;
//!
//! driver.start_operation_a(Deadline::Infinite)?;
//! driver.end_operation_a()?;
//! follower.start_operation_b(Deadline::Infinite)?;
//! follower.end_operation_b()?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod async_buffer;
pub mod error;
pub mod handoff;
pub mod lockstep;
pub mod manager;
pub mod platform;
pub mod ring_buffer;
pub mod segment;
pub mod signal;
pub mod thread;
pub mod trigger;
pub mod watchdog;

pub use async_buffer::AsyncBuffer;
pub use error::{ShmError, ShmResult};
pub use handoff::{Future, HandoffContext, Promise, Usage, one_shot};
pub use lockstep::Lockstep;
pub use manager::{SegmentFdMap, SharedMemoryManager};
pub use ring_buffer::RingBuffer;
pub use segment::{SegmentHeader, SegmentRole, ShmPayload, ShmSegment};
pub use signal::BinarySignal;
pub use thread::ThreadOptions;
pub use trigger::{
    RemoteTriggerClient, RemoteTriggerServer, RunningTriggerServer, TriggerHandle, TriggerSlot,
};
pub use watchdog::DeadlineWatchdog;

use evo_common::config::LogLevel;

/// Initialize tracing from `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// Initialize tracing at `level`, or from `RUST_LOG` when set; `json`
/// selects machine-readable output.
pub fn init_tracing_with(level: LogLevel, json: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_directive()));
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_line_number(true);

    let _ = if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
}
