//! Remote-trigger wiring for a hardware module process.
//!
//! Each lifecycle operation is exposed as a named [`RemoteTriggerServer`]
//! (`<module>_<trigger>`) on its own thread. `read_status` and
//! `apply_command` run at RT priority because the control loop triggers
//! them every cycle; the state-change triggers run at the lower
//! state-change priority.

use crate::config::ThreadsConfig;
use crate::handler::HardwareModuleHandler;
use evo_common::status::{RtError, RtResult};
use evo_common::time::Deadline;
use evo_rt_sync::platform::lock_memory;
use evo_rt_sync::{
    RemoteTriggerClient, RemoteTriggerServer, RunningTriggerServer, SegmentFdMap,
    SharedMemoryManager, TriggerHandle,
};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// The operations a hardware module exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleTrigger {
    /// [`HardwareModuleHandler::on_activate`].
    Activate,
    /// [`HardwareModuleHandler::on_deactivate`].
    Deactivate,
    /// [`HardwareModuleHandler::on_prepare`].
    Prepare,
    /// [`HardwareModuleHandler::on_enable_motion`].
    EnableMotion,
    /// [`HardwareModuleHandler::on_disable_motion`].
    DisableMotion,
    /// [`HardwareModuleHandler::on_clear_faults`].
    ClearFaults,
    /// [`HardwareModuleHandler::read_status`].
    ReadStatus,
    /// [`HardwareModuleHandler::apply_command_if_motion_enabled`].
    ApplyCommand,
}

impl ModuleTrigger {
    /// Every trigger.
    pub const ALL: [Self; 8] = [
        Self::Activate,
        Self::Deactivate,
        Self::Prepare,
        Self::EnableMotion,
        Self::DisableMotion,
        Self::ClearFaults,
        Self::ReadStatus,
        Self::ApplyCommand,
    ];

    /// Trigger name suffix.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::Prepare => "prepare",
            Self::EnableMotion => "enable_motion",
            Self::DisableMotion => "disable_motion",
            Self::ClearFaults => "clear_faults",
            Self::ReadStatus => "read_status",
            Self::ApplyCommand => "apply_command",
        }
    }

    /// Whether the trigger is part of the per-cycle RT path.
    pub const fn is_rt(self) -> bool {
        matches!(self, Self::ReadStatus | Self::ApplyCommand)
    }

    /// Full trigger name for `module`.
    pub fn server_name(self, module: &str) -> String {
        format!("{module}_{}", self.name())
    }

    /// Run the operation on `handler`.
    pub fn invoke(self, handler: &HardwareModuleHandler) -> RtResult<()> {
        match self {
            Self::Activate => handler.on_activate(),
            Self::Deactivate => handler.on_deactivate(),
            Self::Prepare => handler.on_prepare(),
            Self::EnableMotion => handler.on_enable_motion(),
            Self::DisableMotion => handler.on_disable_motion(),
            Self::ClearFaults => handler.on_clear_faults(),
            Self::ReadStatus => handler.read_status(),
            Self::ApplyCommand => handler.apply_command_if_motion_enabled().map(|_| ()),
        }
    }
}

impl fmt::Display for ModuleTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Running trigger servers of one module. Stops them on drop.
pub struct HardwareModuleTriggers {
    module: String,
    servers: Vec<RunningTriggerServer>,
}

impl HardwareModuleTriggers {
    /// Create the trigger segments in `manager` and start one server thread
    /// per trigger.
    pub fn start(
        handler: &Arc<HardwareModuleHandler>,
        manager: &mut SharedMemoryManager,
        threads: &ThreadsConfig,
    ) -> RtResult<Self> {
        let module = handler.name().to_string();
        if threads.lock_memory {
            if let Err(e) = lock_memory() {
                warn!(module = %module, "mlockall failed ({}), pages may fault", e);
            }
        }
        let mut servers = Vec::with_capacity(ModuleTrigger::ALL.len());
        for trigger in ModuleTrigger::ALL {
            let name = trigger.server_name(&module);
            let callback = {
                let handler = Arc::clone(handler);
                move || {
                    if let Err(e) = trigger.invoke(&handler) {
                        warn!(module = %handler.name(), %trigger, "trigger failed: {}", e);
                    }
                }
            };
            let server = RemoteTriggerServer::new(manager, &name, callback)?;
            let thread_name = format!("hm-{}", trigger.name());
            let options = if trigger.is_rt() {
                threads.rt(thread_name)
            } else {
                threads.statechange(thread_name)
            };
            servers.push(server.start(options)?);
        }
        info!(module = %module, triggers = servers.len(), "hardware module triggers started");
        Ok(Self { module, servers })
    }

    /// Module name.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Number of running servers.
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Whether every server has been stopped.
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Stop every server; pending client requests fail with `Cancelled`.
    pub fn stop(&mut self) {
        for mut server in self.servers.drain(..) {
            let _ = server.stop();
        }
        info!(module = %self.module, "hardware module triggers stopped");
    }
}

impl Drop for HardwareModuleTriggers {
    fn drop(&mut self) {
        if !self.servers.is_empty() {
            self.stop();
        }
    }
}

impl fmt::Debug for HardwareModuleTriggers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareModuleTriggers")
            .field("module", &self.module)
            .field("servers", &self.servers.len())
            .finish()
    }
}

/// Client side: invokes a module's triggers from another thread or process.
#[derive(Debug)]
pub struct HardwareModuleClient {
    module: String,
    clients: Vec<RemoteTriggerClient>,
}

impl HardwareModuleClient {
    /// Connect to every trigger of `module` found in `fds`.
    pub fn connect(fds: &SegmentFdMap, module: &str) -> RtResult<Self> {
        let clients = ModuleTrigger::ALL
            .iter()
            .map(|trigger| -> RtResult<RemoteTriggerClient> {
                let mut client = RemoteTriggerClient::new(trigger.server_name(module));
                client.connect(fds)?;
                Ok(client)
            })
            .collect::<RtResult<Vec<_>>>()?;
        Ok(Self {
            module: module.to_string(),
            clients,
        })
    }

    /// Module name.
    pub fn module(&self) -> &str {
        &self.module
    }

    fn client(&self, trigger: ModuleTrigger) -> RtResult<&RemoteTriggerClient> {
        self.clients
            .get(trigger as usize)
            .ok_or_else(|| RtError::internal("trigger client missing"))
    }

    /// Invoke `trigger` and wait for it to run.
    pub fn trigger(&self, trigger: ModuleTrigger, deadline: Deadline) -> RtResult<()> {
        self.client(trigger)?.trigger(deadline)
    }

    /// Invoke `trigger` without waiting.
    pub fn trigger_async(&self, trigger: ModuleTrigger) -> RtResult<TriggerHandle> {
        self.client(trigger)?.trigger_async()
    }

    /// One control cycle: `read_status` then `apply_command`.
    pub fn cycle(&self, deadline: Deadline) -> RtResult<()> {
        self.trigger(ModuleTrigger::ReadStatus, deadline)?;
        self.trigger(ModuleTrigger::ApplyCommand, deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eight_distinct_triggers() {
        let names: std::collections::HashSet<_> =
            ModuleTrigger::ALL.iter().map(|t| t.name()).collect();
        assert_eq!(names.len(), 8);
        assert_eq!(
            ModuleTrigger::ReadStatus.server_name("gripper"),
            "gripper_read_status"
        );
    }

    #[test]
    fn index_matches_declaration_order() {
        for (index, trigger) in ModuleTrigger::ALL.iter().enumerate() {
            assert_eq!(*trigger as usize, index);
        }
    }

    #[test]
    fn only_cycle_triggers_are_rt() {
        let rt: Vec<_> = ModuleTrigger::ALL.iter().filter(|t| t.is_rt()).collect();
        assert_eq!(
            rt,
            vec![&ModuleTrigger::ReadStatus, &ModuleTrigger::ApplyCommand]
        );
    }
}
