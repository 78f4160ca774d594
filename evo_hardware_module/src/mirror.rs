//! Shared-memory mirror of a module's lifecycle state.
//!
//! Out-of-process observers (supervisor, diagnostics) attach to
//! `<module>_state` as readers and poll it; only the handler writes it.

use evo_common::state::HardwareModuleState;
use evo_rt_sync::ShmPayload;
use static_assertions::const_assert_eq;
use std::mem::{align_of, size_of};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Name of the mirror segment for `module`.
pub fn mirror_segment_name(module: &str) -> String {
    format!("{module}_state")
}

/// Mirror payload.
#[repr(C)]
#[derive(Debug)]
pub struct ModuleStateMirror {
    state: AtomicU32,
    faulted: AtomicU32,
    cycle: AtomicU64,
    transitions: AtomicU64,
}

// Observers map this layout without Rust type information.
const_assert_eq!(size_of::<ModuleStateMirror>(), 24);
const_assert_eq!(align_of::<ModuleStateMirror>(), 8);

// SAFETY: repr(C), atomics only.
unsafe impl ShmPayload for ModuleStateMirror {
    const TYPE_TAG: &'static str = "evo::ModuleStateMirror";

    fn initial() -> Self {
        Self {
            state: AtomicU32::new(HardwareModuleState::Deactivated.as_u8() as u32),
            faulted: AtomicU32::new(0),
            cycle: AtomicU64::new(0),
            transitions: AtomicU64::new(0),
        }
    }
}

impl ModuleStateMirror {
    /// Publish a state write.
    pub fn store_state(&self, state: HardwareModuleState) {
        self.faulted
            .store(u32::from(state.is_fault()), Ordering::Relaxed);
        self.state.store(u32::from(state.as_u8()), Ordering::Release);
        self.transitions.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish the RT cycle counter.
    pub fn store_cycle(&self, cycle: u64) {
        self.cycle.store(cycle, Ordering::Release);
    }

    /// Last published state; `None` if the byte is corrupt.
    pub fn state(&self) -> Option<HardwareModuleState> {
        u8::try_from(self.state.load(Ordering::Acquire))
            .ok()
            .and_then(HardwareModuleState::from_u8)
    }

    /// Whether the last published state is a fault.
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Relaxed) != 0
    }

    /// Last published cycle.
    pub fn cycle(&self) -> u64 {
        self.cycle.load(Ordering::Acquire)
    }

    /// Number of state writes since creation.
    pub fn transitions(&self) -> u64 {
        self.transitions.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_tracks_faults() {
        let mirror = ModuleStateMirror::initial();
        assert_eq!(mirror.state(), Some(HardwareModuleState::Deactivated));
        mirror.store_state(HardwareModuleState::FatallyFaulted);
        assert!(mirror.is_faulted());
        assert_eq!(mirror.state(), Some(HardwareModuleState::FatallyFaulted));
        mirror.store_state(HardwareModuleState::Activated);
        assert!(!mirror.is_faulted());
        assert_eq!(mirror.transitions(), 2);
    }
}
