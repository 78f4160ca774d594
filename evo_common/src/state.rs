//! Hardware module lifecycle states and process exit codes.
//!
//! `HardwareModuleState` uses `#[repr(u8)]` so it can live in an `AtomicU8`
//! and in shared-memory mirrors read by other processes.

use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Lifecycle State ────────────────────────────────────────────────

/// Lifecycle state of a hardware module.
///
/// Written only by the RT thread once the control loop runs, or directly by
/// the single calling thread before that. `InitFailed` and `FatallyFaulted`
/// are terminal until the process is restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum HardwareModuleState {
    /// Powered down, no resources held.
    #[default]
    Deactivated = 0,
    /// Releasing resources.
    Deactivating = 1,
    /// Loading calibration and preparing hardware.
    Preparing = 2,
    /// Prepared, ready to activate.
    Prepared = 3,
    /// Bringing up communication with the hardware.
    Activating = 4,
    /// Communicating, motion disabled.
    Activated = 5,
    /// Motion enable requested.
    MotionEnabling = 6,
    /// Accepting commands.
    MotionEnabled = 7,
    /// Motion disable requested.
    MotionDisabling = 8,
    /// Recoverable fault latched.
    Faulted = 9,
    /// Fault clearing requested.
    ClearingFaults = 10,
    /// Initialization failed; restart required.
    InitFailed = 11,
    /// Unrecoverable fault; restart required.
    FatallyFaulted = 12,
}

impl HardwareModuleState {
    /// Every state, in discriminant order.
    pub const ALL: [Self; 13] = [
        Self::Deactivated,
        Self::Deactivating,
        Self::Preparing,
        Self::Prepared,
        Self::Activating,
        Self::Activated,
        Self::MotionEnabling,
        Self::MotionEnabled,
        Self::MotionDisabling,
        Self::Faulted,
        Self::ClearingFaults,
        Self::InitFailed,
        Self::FatallyFaulted,
    ];

    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Deactivated),
            1 => Some(Self::Deactivating),
            2 => Some(Self::Preparing),
            3 => Some(Self::Prepared),
            4 => Some(Self::Activating),
            5 => Some(Self::Activated),
            6 => Some(Self::MotionEnabling),
            7 => Some(Self::MotionEnabled),
            8 => Some(Self::MotionDisabling),
            9 => Some(Self::Faulted),
            10 => Some(Self::ClearingFaults),
            11 => Some(Self::InitFailed),
            12 => Some(Self::FatallyFaulted),
            _ => None,
        }
    }

    /// Raw discriminant, as stored in atomics and mirrors.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// `InitFailed` or `FatallyFaulted`: left only by a process restart.
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::InitFailed | Self::FatallyFaulted)
    }

    /// Any latched fault, recoverable or not.
    #[inline]
    pub const fn is_fault(self) -> bool {
        matches!(self, Self::Faulted | Self::InitFailed | Self::FatallyFaulted)
    }

    /// Short upper-case name used in logs and the status surface.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Deactivated => "DEACTIVATED",
            Self::Deactivating => "DEACTIVATING",
            Self::Preparing => "PREPARING",
            Self::Prepared => "PREPARED",
            Self::Activating => "ACTIVATING",
            Self::Activated => "ACTIVATED",
            Self::MotionEnabling => "MOTION_ENABLING",
            Self::MotionEnabled => "MOTION_ENABLED",
            Self::MotionDisabling => "MOTION_DISABLING",
            Self::Faulted => "FAULTED",
            Self::ClearingFaults => "CLEARING_FAULTS",
            Self::InitFailed => "INIT_FAILED",
            Self::FatallyFaulted => "FATALLY_FAULTED",
        }
    }
}

impl fmt::Display for HardwareModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Exit Codes ─────────────────────────────────────────────────────

/// Process exit codes consumed by the external supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ExitCode {
    /// Normal shutdown.
    Normal = 0,
    /// Supervisor should restart the process.
    RestartRequested = 110,
    /// Fatal fault while initializing.
    FatalFaultDuringInit = 111,
    /// Fatal fault while running.
    FatalFaultDuringExecution = 112,
}

impl ExitCode {
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Exit code implied by a latched lifecycle state.
    pub const fn for_state(state: HardwareModuleState) -> Self {
        match state {
            HardwareModuleState::InitFailed => Self::FatalFaultDuringInit,
            HardwareModuleState::FatallyFaulted => Self::FatalFaultDuringExecution,
            _ => Self::Normal,
        }
    }

    /// Terminate the process with this code.
    pub fn exit(self) -> ! {
        tracing::info!(code = self.code(), "exiting: {:?}", self);
        std::process::exit(self.code())
    }
}
