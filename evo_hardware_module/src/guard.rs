//! Transition guard: the single source of truth for lifecycle legality.
//!
//! ```text
//! Deactivated ──► Preparing ──► Prepared ──► Activating ──► Activated
//!      ▲                                                     │   ▲
//!      └──────── Deactivating ◄──── any non-terminal ◄───────┘   │
//!                                                                │
//!   Activated ──► MotionEnabling ──► MotionEnabled ──► MotionDisabling
//!
//!   any non-terminal ──► Faulted ──► ClearingFaults ──► Activated
//!   any non-terminal ──► FatallyFaulted   (terminal)
//!   Deactivated/Preparing/Activating ──► InitFailed (terminal)
//! ```

use evo_common::state::HardwareModuleState;

/// Classification of a `(from, to)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionGuard {
    /// The transition changes state.
    Allowed,
    /// The transition is illegal; callers report `FailedPrecondition`.
    Prohibited,
    /// Already there (or equivalent); callers succeed without effect.
    NoOp,
}

impl TransitionGuard {
    /// Classify `from -> to`. Total over the state set.
    pub const fn classify(from: HardwareModuleState, to: HardwareModuleState) -> Self {
        use HardwareModuleState::*;

        if from as u8 == to as u8 {
            return Self::NoOp;
        }
        // Terminal states are left only by a process restart.
        if from.is_terminal() {
            return Self::Prohibited;
        }
        match (from, to) {
            (_, FatallyFaulted) => Self::Allowed,
            (Deactivated | Preparing | Activating, InitFailed) => Self::Allowed,
            (_, InitFailed) => Self::Prohibited,
            (_, Faulted) => Self::Allowed,

            (Deactivated, Preparing) => Self::Allowed,
            (Preparing, Prepared) => Self::Allowed,
            (Prepared, Preparing) => Self::NoOp,

            (Prepared, Activating) => Self::Allowed,
            (Activating, Activated) => Self::Allowed,
            (Activated | MotionEnabling | MotionEnabled | MotionDisabling, Activating) => {
                Self::NoOp
            }

            (Deactivated, Deactivating) => Self::NoOp,
            (_, Deactivating) => Self::Allowed,
            (Deactivating, Deactivated) => Self::Allowed,

            (Activated, MotionEnabling) => Self::Allowed,
            (MotionEnabling, MotionEnabled) => Self::Allowed,
            (MotionEnabled, MotionEnabling) => Self::NoOp,

            (MotionEnabling | MotionEnabled, MotionDisabling) => Self::Allowed,
            (MotionDisabling, Activated) => Self::Allowed,
            (Activated, MotionDisabling) => Self::NoOp,

            (Faulted, ClearingFaults) => Self::Allowed,
            (ClearingFaults, Activated) => Self::Allowed,
            (Deactivated | Prepared | Activated, ClearingFaults) => Self::NoOp,

            _ => Self::Prohibited,
        }
    }

    /// Whether the pair is [`Allowed`](Self::Allowed).
    #[inline]
    pub const fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use HardwareModuleState::*;
    use proptest::prelude::*;

    fn any_state() -> impl Strategy<Value = HardwareModuleState> {
        (0u8..13).prop_map(|v| HardwareModuleState::from_u8(v).unwrap())
    }

    #[test]
    fn enable_while_enabled_is_noop() {
        assert_eq!(
            TransitionGuard::classify(MotionEnabled, MotionEnabling),
            TransitionGuard::NoOp
        );
    }

    #[test]
    fn happy_path_is_allowed() {
        let path = [
            Deactivated,
            Preparing,
            Prepared,
            Activating,
            Activated,
            MotionEnabling,
            MotionEnabled,
            MotionDisabling,
            Activated,
            Deactivating,
            Deactivated,
        ];
        for pair in path.windows(2) {
            assert!(
                TransitionGuard::classify(pair[0], pair[1]).is_allowed(),
                "{} -> {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn fault_recovery_path_is_allowed() {
        assert!(TransitionGuard::classify(MotionEnabled, Faulted).is_allowed());
        assert!(TransitionGuard::classify(Faulted, ClearingFaults).is_allowed());
        assert!(TransitionGuard::classify(ClearingFaults, Activated).is_allowed());
        assert!(TransitionGuard::classify(ClearingFaults, Faulted).is_allowed());
    }

    #[test]
    fn enable_requires_activation() {
        for from in [Deactivated, Prepared, Faulted, FatallyFaulted] {
            assert_eq!(
                TransitionGuard::classify(from, MotionEnabling),
                TransitionGuard::Prohibited,
                "{from}"
            );
        }
    }

    #[test]
    fn fatal_fault_does_not_downgrade() {
        assert_eq!(
            TransitionGuard::classify(FatallyFaulted, Faulted),
            TransitionGuard::Prohibited
        );
        assert!(TransitionGuard::classify(Faulted, FatallyFaulted).is_allowed());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            max_global_rejects: 65536,
            ..ProptestConfig::default()
        })]

        #[test]
        fn classification_is_total_and_reflexive_noop(from in any_state(), to in any_state()) {
            let guard = TransitionGuard::classify(from, to);
            if from == to {
                prop_assert_eq!(guard, TransitionGuard::NoOp);
            }
        }

        #[test]
        fn terminal_states_never_leave(from in any_state(), to in any_state()) {
            prop_assume!(from.is_terminal() && from != to);
            prop_assert_eq!(TransitionGuard::classify(from, to), TransitionGuard::Prohibited);
        }

        #[test]
        fn every_live_state_may_fail_fatally(from in any_state()) {
            prop_assume!(!from.is_terminal());
            prop_assert!(TransitionGuard::classify(from, FatallyFaulted).is_allowed());
        }
    }
}
