//! Scriptable module shared by the integration suites.

#![allow(dead_code)]

use evo_common::status::{RtError, RtResult};
use evo_hardware_module::{HandlerOptions, HardwareModule, HardwareModuleHandler};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Call counters and injected failures, shared with the test body.
#[derive(Default)]
pub struct Probe {
    pub enabled: AtomicU32,
    pub disabled: AtomicU32,
    pub read_status: AtomicU32,
    pub apply_command: AtomicU32,
    pub apply_error: Mutex<Option<RtError>>,
}

impl Probe {
    pub fn count(counter: &AtomicU32) -> u32 {
        counter.load(Ordering::Acquire)
    }
}

pub struct ScriptedModule {
    probe: Arc<Probe>,
}

impl ScriptedModule {
    pub fn new(probe: &Arc<Probe>) -> Self {
        Self {
            probe: Arc::clone(probe),
        }
    }
}

impl HardwareModule for ScriptedModule {
    fn prepare(&mut self) -> RtResult<()> {
        Ok(())
    }
    fn activate(&mut self) -> RtResult<()> {
        Ok(())
    }
    fn deactivate(&mut self) -> RtResult<()> {
        Ok(())
    }
    fn enable_motion(&mut self) -> RtResult<()> {
        Ok(())
    }
    fn disable_motion(&mut self) -> RtResult<()> {
        Ok(())
    }
    fn clear_faults(&mut self) -> RtResult<()> {
        Ok(())
    }
    fn read_status(&mut self) -> RtResult<()> {
        self.probe.read_status.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
    fn apply_command(&mut self) -> RtResult<()> {
        self.probe.apply_command.fetch_add(1, Ordering::AcqRel);
        match self.probe.apply_error.lock().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
    fn enabled(&mut self) -> RtResult<()> {
        self.probe.enabled.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
    fn disabled(&mut self) -> RtResult<()> {
        self.probe.disabled.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Handler over a [`ScriptedModule`], brought up to `Activated`.
pub fn activated_handler(
    name: &str,
    statechange_timeout: Duration,
) -> (Arc<HardwareModuleHandler>, Arc<Probe>) {
    let probe = Arc::new(Probe::default());
    let options = HandlerOptions {
        statechange_timeout,
        ..HandlerOptions::default()
    };
    let handler = HardwareModuleHandler::new(name, ScriptedModule::new(&probe), options);
    handler.on_prepare().expect("prepare");
    handler.on_activate().expect("activate");
    (Arc::new(handler), probe)
}

/// Spin until `pending` requests are queued.
pub fn wait_for_pending(handler: &HardwareModuleHandler, pending: usize) {
    let start = Instant::now();
    while handler.pending_requests() < pending {
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "request never queued"
        );
        thread::sleep(Duration::from_millis(1));
    }
}
