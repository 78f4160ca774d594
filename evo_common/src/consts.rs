//! System-wide constants for the EVO workspace.
//!
//! Single source of truth for timeouts, queue depths and shared-memory
//! layout limits.

use static_assertions::const_assert;
use std::time::Duration;

/// How long a non-RT caller waits for the RT thread to apply a queued
/// state change. Must stay far above one control cycle.
pub const STATECHANGE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How long an owning handoff handle waits for its peer to detach on drop.
pub const HANDOFF_DETACH_TIMEOUT: Duration = Duration::from_secs(1);

/// Grace period before the shutdown watchdog escalates.
pub const SHUTDOWN_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval of a remote trigger server loop.
pub const TRIGGER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Sleep between checks while a lockstep reset waits for blocked parties.
pub const LOCKSTEP_RESET_POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Depth of the async state-change request queue.
pub const ASYNC_REQUEST_QUEUE_DEPTH: usize = 10;

/// Default control cycle time in microseconds (1 kHz).
pub const CYCLE_TIME_US: u64 = 1000;

/// Cache line size assumed for shared-memory layouts.
pub const CACHE_LINE_SIZE: usize = 64;

/// Length of the type tag stored in every segment header.
pub const SEGMENT_TYPE_TAG_LEN: usize = 100;

/// Maximum segment name length (memfd names are limited to 249 bytes).
pub const MAX_SEGMENT_NAME_LEN: usize = 240;

/// Capacity of inline fault and request messages.
pub const MAX_STATUS_MESSAGE_LEN: usize = 256;

/// Default SCHED_FIFO priority of the RT cycle thread.
pub const RT_THREAD_PRIORITY: i32 = 80;

/// Default SCHED_FIFO priority of the state-change trigger threads.
pub const STATECHANGE_THREAD_PRIORITY: i32 = 40;

const_assert!(ASYNC_REQUEST_QUEUE_DEPTH > 0);
const_assert!(RT_THREAD_PRIORITY > STATECHANGE_THREAD_PRIORITY);
const_assert!(SEGMENT_TYPE_TAG_LEN == 100);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statechange_timeout_dwarfs_cycle() {
        let cycle = Duration::from_micros(CYCLE_TIME_US);
        assert!(STATECHANGE_REQUEST_TIMEOUT > cycle * 1000);
    }

    #[test]
    fn priorities_are_valid_fifo_range() {
        for prio in [RT_THREAD_PRIORITY, STATECHANGE_THREAD_PRIORITY] {
            assert!((1..=99).contains(&prio));
        }
    }
}
