//! Queued state-change requests.

use evo_common::consts::MAX_STATUS_MESSAGE_LEN;
use evo_common::state::HardwareModuleState;
use evo_common::status::RtResult;
use evo_rt_sync::Promise;
use heapless::String as FixedString;

/// Inline message carried by requests and fault reports.
pub type StatusMessage = FixedString<MAX_STATUS_MESSAGE_LEN>;

/// Copy `text` into a [`StatusMessage`], truncating on a char boundary.
pub fn status_message(text: &str) -> StatusMessage {
    let mut message = StatusMessage::new();
    for ch in text.chars() {
        if message.push(ch).is_err() {
            break;
        }
    }
    message
}

/// A state change submitted by a non-RT caller and applied by the RT
/// thread in `read_status`.
///
/// `Default` is an empty slot value; its detached promise never allocates.
#[derive(Debug, Default)]
pub struct AsyncRequest {
    /// State the caller observed when submitting.
    pub from: HardwareModuleState,
    /// Requested target state.
    pub to: HardwareModuleState,
    /// Reason, for logs.
    pub message: StatusMessage,
    /// `monotonic_ns()` taken before the guard check.
    pub timestamp_ns: i64,
    /// Resolved once the request is applied or rejected.
    pub promise: Promise<RtResult<()>>,
}
