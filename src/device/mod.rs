//! Simulated devices
//!
//! A `SimulatorDevice` wires one command tracker, task runner and
//! observation state machine together, publishes their changes as named
//! events, and exposes the invocation, attribute and test-hook surface.

mod attributes;
mod communication;
mod context;
mod profile;

pub use attributes::DeviceAttributes;
pub use communication::CommunicationManager;
pub use context::DeviceContext;
pub use profile::{DeviceKind, DeviceProfile};

use std::sync::Arc;
use std::time::Duration;

use cspsim_shared::{
    AdminMode, CommandError, CommandId, CommandTracker, HealthState, LegalityTable, ObsState,
    ObsStateMachine, PowerState, SweeperHandle, TaskResult, TaskStatus,
};
use tracing::info;

use crate::command::{CommandExecutor, CommandResponse};
use crate::config::{DeviceConfig, SimulatorConfig};
use crate::events::{DeviceEvent, EventPublisher};

/// One simulated device
pub struct SimulatorDevice {
    ctx: Arc<DeviceContext>,
    executor: CommandExecutor,
    communication: CommunicationManager,
    publisher: Arc<EventPublisher>,
    _sweeper: SweeperHandle,
}

impl SimulatorDevice {
    /// Create a device with the default legality table.
    ///
    /// Must be called within a tokio runtime: the record sweeper starts here.
    pub fn new(config: DeviceConfig) -> Self {
        Self::with_legality(config, LegalityTable::default())
    }

    pub fn with_legality(config: DeviceConfig, legality: LegalityTable) -> Self {
        let publisher = Arc::new(EventPublisher::new(config.name.clone()));
        let tracker = Arc::new(CommandTracker::with_removal_time(
            publisher.clone(),
            config.simulator.removal_time,
        ));
        let obs = Arc::new(ObsStateMachine::new(
            config.profile.initial_obs_state(),
            publisher.clone(),
        ));
        let attributes = Arc::new(DeviceAttributes::new(publisher.clone()));

        let sweeper = tracker.start_sweeper();
        let ctx = Arc::new(DeviceContext::new(
            config.name,
            config.profile,
            tracker,
            obs,
            attributes,
            legality,
            config.simulator,
        ));

        info!("[{}] Simulated {:?} device ready", ctx.name, ctx.profile.kind);
        Self {
            executor: CommandExecutor::new(ctx.clone()),
            communication: CommunicationManager::new(ctx.clone()),
            ctx,
            publisher,
            _sweeper: sweeper,
        }
    }

    pub fn name(&self) -> &str {
        &self.ctx.name
    }

    pub fn profile(&self) -> DeviceProfile {
        self.ctx.profile
    }

    /// Invoke a command by name with an optional JSON argument
    pub fn invoke(
        &self,
        command_name: &str,
        payload: Option<&str>,
    ) -> Result<CommandResponse, CommandError> {
        self.executor.invoke(command_name, payload)
    }

    pub fn tracker(&self) -> &Arc<CommandTracker> {
        &self.ctx.tracker
    }

    /// Wait until a command reaches a terminal status
    pub async fn wait_for_terminal(&self, command_id: &CommandId) -> TaskStatus {
        self.ctx.tracker.wait_for_terminal(command_id).await
    }

    pub fn command_status(&self, command_id: &CommandId) -> TaskStatus {
        self.ctx.tracker.get_command_status(command_id)
    }

    pub fn command_result(&self) -> Option<(CommandId, TaskResult)> {
        self.ctx.tracker.command_result()
    }

    // Attributes

    pub fn obs_state(&self) -> ObsState {
        self.ctx.obs.state()
    }

    pub fn power_state(&self) -> PowerState {
        self.ctx.attributes.power()
    }

    pub fn admin_mode(&self) -> AdminMode {
        self.ctx.attributes.admin()
    }

    pub fn health_state(&self) -> HealthState {
        self.ctx.attributes.health()
    }

    pub fn simulation_mode(&self) -> bool {
        self.ctx.attributes.simulation_mode()
    }

    pub fn sys_param(&self) -> Option<String> {
        self.ctx.attributes.sys_param()
    }

    /// Write the admin mode; communication follows after a delay
    pub fn set_admin_mode(&self, mode: AdminMode) -> bool {
        self.communication.request(mode)
    }

    pub fn config(&self) -> SimulatorConfig {
        self.ctx.config()
    }

    /// Applies to commands invoked from now on
    pub fn set_time_to_complete(&self, value: Duration) {
        self.ctx.set_time_to_complete(value);
    }

    // Force commands, bypassing legality

    pub fn force_power_state(&self, value: PowerState) -> bool {
        self.ctx.attributes.set_power(value)
    }

    pub fn force_health_state(&self, value: HealthState) -> bool {
        self.ctx.attributes.set_health(value)
    }

    pub fn force_obs_state(&self, value: ObsState) -> bool {
        self.ctx.obs.update(value)
    }

    // Fault injection

    /// One-shot: the next polling task drives the device to FAULT
    pub fn set_obs_faulty(&self, value: bool) {
        set_flag(&self.ctx.signals.obs_faulty, value);
    }

    pub fn obs_faulty(&self) -> bool {
        self.ctx.signals.obs_faulty.is_set()
    }

    /// Persistent: every task completes with a failure until cleared
    pub fn set_faulty_in_command(&self, value: bool) {
        set_flag(&self.ctx.signals.faulty_in_command, value);
    }

    /// Every invocation fails synchronously until cleared
    pub fn set_raise_exception(&self, value: bool) {
        set_flag(&self.ctx.raise_exception, value);
    }

    /// Abort running commands without going through the Abort command
    pub fn signal_abort(&self) {
        self.ctx.signals.aborts.raise();
    }

    // Events

    pub async fn recv_event(&self) -> Option<DeviceEvent> {
        self.publisher.recv_event().await
    }

    pub fn drain_events(&self) -> Vec<DeviceEvent> {
        self.publisher.drain_events()
    }
}

fn set_flag(flag: &cspsim_shared::Flag, value: bool) {
    if value {
        flag.set();
    } else {
        flag.clear();
    }
}
