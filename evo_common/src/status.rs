//! Status taxonomy shared by RT and non-RT code.
//!
//! Every fallible operation in the workspace returns [`RtResult`]. Messages are
//! `Cow<'static, str>` so RT paths can report failures with static strings and
//! never touch the allocator; non-RT paths may attach formatted context.

use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Classification of an [`RtError`], usable as a compact discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StatusCode {
    /// Malformed request or handle not connected.
    InvalidArgument = 1,
    /// Guard violation, handle not attached, reset without prior cancel.
    FailedPrecondition = 2,
    /// Duplicate attach or duplicate in-flight trigger.
    AlreadyExists = 3,
    /// Peer cancelled, superseded request, concurrent reset.
    Cancelled = 4,
    /// Slot full, queue full, reset in progress.
    ResourceExhausted = 5,
    /// A bounded wait timed out.
    DeadlineExceeded = 6,
    /// Nothing ready yet; retryable.
    Unavailable = 7,
    /// Invariant violation.
    Internal = 8,
    /// Unrecoverable failure; a process restart is required.
    Aborted = 9,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::FailedPrecondition => "FAILED_PRECONDITION",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::Cancelled => "CANCELLED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL",
            Self::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// Error type for every RT and non-RT operation in the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RtError {
    /// Malformed request or handle not connected.
    #[error("invalid argument: {0}")]
    InvalidArgument(Cow<'static, str>),

    /// Operation not legal in the current state.
    #[error("failed precondition: {0}")]
    FailedPrecondition(Cow<'static, str>),

    /// The role or request is already taken.
    #[error("already exists: {0}")]
    AlreadyExists(Cow<'static, str>),

    /// The operation was cancelled or superseded.
    #[error("cancelled: {0}")]
    Cancelled(Cow<'static, str>),

    /// No capacity left for the operation.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(Cow<'static, str>),

    /// A bounded wait ran out of time.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(Cow<'static, str>),

    /// Nothing ready yet.
    #[error("unavailable: {0}")]
    Unavailable(Cow<'static, str>),

    /// Internal invariant violated.
    #[error("internal: {0}")]
    Internal(Cow<'static, str>),

    /// Unrecoverable failure.
    #[error("aborted: {0}")]
    Aborted(Cow<'static, str>),
}

/// Result alias used across the workspace.
pub type RtResult<T> = Result<T, RtError>;

impl RtError {
    /// Build an error of the given class.
    pub fn new(code: StatusCode, message: impl Into<Cow<'static, str>>) -> Self {
        let message = message.into();
        match code {
            StatusCode::InvalidArgument => Self::InvalidArgument(message),
            StatusCode::FailedPrecondition => Self::FailedPrecondition(message),
            StatusCode::AlreadyExists => Self::AlreadyExists(message),
            StatusCode::Cancelled => Self::Cancelled(message),
            StatusCode::ResourceExhausted => Self::ResourceExhausted(message),
            StatusCode::DeadlineExceeded => Self::DeadlineExceeded(message),
            StatusCode::Unavailable => Self::Unavailable(message),
            StatusCode::Internal => Self::Internal(message),
            StatusCode::Aborted => Self::Aborted(message),
        }
    }

    pub fn invalid_argument(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn failed_precondition(message: impl Into<Cow<'static, str>>) -> Self {
        Self::FailedPrecondition(message.into())
    }

    pub fn already_exists(message: impl Into<Cow<'static, str>>) -> Self {
        Self::AlreadyExists(message.into())
    }

    pub fn cancelled(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Cancelled(message.into())
    }

    pub fn resource_exhausted(message: impl Into<Cow<'static, str>>) -> Self {
        Self::ResourceExhausted(message.into())
    }

    pub fn deadline_exceeded(message: impl Into<Cow<'static, str>>) -> Self {
        Self::DeadlineExceeded(message.into())
    }

    pub fn unavailable(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn internal(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(message.into())
    }

    pub fn aborted(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Aborted(message.into())
    }

    /// Class of this error.
    pub const fn code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) => StatusCode::InvalidArgument,
            Self::FailedPrecondition(_) => StatusCode::FailedPrecondition,
            Self::AlreadyExists(_) => StatusCode::AlreadyExists,
            Self::Cancelled(_) => StatusCode::Cancelled,
            Self::ResourceExhausted(_) => StatusCode::ResourceExhausted,
            Self::DeadlineExceeded(_) => StatusCode::DeadlineExceeded,
            Self::Unavailable(_) => StatusCode::Unavailable,
            Self::Internal(_) => StatusCode::Internal,
            Self::Aborted(_) => StatusCode::Aborted,
        }
    }

    /// Human-readable message without the class prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::InvalidArgument(m)
            | Self::FailedPrecondition(m)
            | Self::AlreadyExists(m)
            | Self::Cancelled(m)
            | Self::ResourceExhausted(m)
            | Self::DeadlineExceeded(m)
            | Self::Unavailable(m)
            | Self::Internal(m)
            | Self::Aborted(m) => m,
        }
    }

    /// Whether retrying the same call later may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.code(),
            StatusCode::Unavailable | StatusCode::ResourceExhausted | StatusCode::DeadlineExceeded
        )
    }

    /// Whether the error requires a process restart.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}
