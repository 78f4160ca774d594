//! Interface implemented by concrete hardware modules.

use evo_common::status::RtResult;

/// A hardware module driven by a
/// [`HardwareModuleHandler`](crate::HardwareModuleHandler).
///
/// The handler serializes every call; implementations never see two
/// methods running at once.
///
/// # Timing Contracts
///
/// | Method | Thread | RT Constraint |
/// |--------|--------|---------------|
/// | `prepare`, `activate`, `deactivate` | state-change | none |
/// | `enable_motion`, `disable_motion`, `clear_faults` | RT | **HARD** |
/// | `read_status`, `apply_command` | RT | **HARD** |
/// | `enabled`, `disabled` | RT (or caller of a direct transition) | **HARD** |
///
/// # Errors
///
/// Any error moves the module to `Faulted`; `RtError::Aborted` moves it to
/// `FatallyFaulted` instead.
pub trait HardwareModule: Send {
    /// Load configuration and prepare hardware. Failures are init failures.
    fn prepare(&mut self) -> RtResult<()>;

    /// Start communicating with the hardware.
    fn activate(&mut self) -> RtResult<()>;

    /// Stop communicating and release resources.
    fn deactivate(&mut self) -> RtResult<()>;

    /// Power the drives. Called once per enable request.
    fn enable_motion(&mut self) -> RtResult<()>;

    /// Remove drive power. Called once per disable request.
    fn disable_motion(&mut self) -> RtResult<()>;

    /// Reset latched hardware faults.
    fn clear_faults(&mut self) -> RtResult<()>;

    /// Read inputs at the start of a cycle.
    fn read_status(&mut self) -> RtResult<()>;

    /// Write outputs at the end of a cycle. Only called while motion is
    /// enabled.
    fn apply_command(&mut self) -> RtResult<()>;

    /// The module just entered `MotionEnabled`.
    fn enabled(&mut self) -> RtResult<()> {
        Ok(())
    }

    /// The module just left `MotionEnabled`.
    fn disabled(&mut self) -> RtResult<()> {
        Ok(())
    }
}

impl<M: HardwareModule + ?Sized> HardwareModule for Box<M> {
    fn prepare(&mut self) -> RtResult<()> {
        (**self).prepare()
    }
    fn activate(&mut self) -> RtResult<()> {
        (**self).activate()
    }
    fn deactivate(&mut self) -> RtResult<()> {
        (**self).deactivate()
    }
    fn enable_motion(&mut self) -> RtResult<()> {
        (**self).enable_motion()
    }
    fn disable_motion(&mut self) -> RtResult<()> {
        (**self).disable_motion()
    }
    fn clear_faults(&mut self) -> RtResult<()> {
        (**self).clear_faults()
    }
    fn read_status(&mut self) -> RtResult<()> {
        (**self).read_status()
    }
    fn apply_command(&mut self) -> RtResult<()> {
        (**self).apply_command()
    }
    fn enabled(&mut self) -> RtResult<()> {
        (**self).enabled()
    }
    fn disabled(&mut self) -> RtResult<()> {
        (**self).disabled()
    }
}
