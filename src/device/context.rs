//! Shared engine state of one device

use std::sync::{Arc, RwLock};
use std::time::Duration;

use cspsim_shared::{
    CommandId, CommandTracker, CommandUpdate, DeviceSignals, Flag, LegalityTable, ObsStateMachine,
    TaskRunner, TaskTiming,
};
use tracing::error;

use super::{DeviceAttributes, DeviceProfile};
use crate::config::SimulatorConfig;

/// Everything command handlers need to run a command on a device
pub struct DeviceContext {
    pub name: String,
    pub profile: DeviceProfile,
    pub tracker: Arc<CommandTracker>,
    pub runner: TaskRunner,
    pub obs: Arc<ObsStateMachine>,
    pub attributes: Arc<DeviceAttributes>,
    pub signals: DeviceSignals,
    /// Makes every invocation fail synchronously
    pub raise_exception: Flag,
    pub legality: LegalityTable,
    config: RwLock<SimulatorConfig>,
}

impl DeviceContext {
    pub fn new(
        name: String,
        profile: DeviceProfile,
        tracker: Arc<CommandTracker>,
        obs: Arc<ObsStateMachine>,
        attributes: Arc<DeviceAttributes>,
        legality: LegalityTable,
        config: SimulatorConfig,
    ) -> Self {
        Self {
            name,
            profile,
            runner: TaskRunner::new(tracker.clone()),
            tracker,
            obs,
            attributes,
            signals: DeviceSignals::default(),
            raise_exception: Flag::new(),
            legality,
            config: RwLock::new(config),
        }
    }

    pub fn config(&self) -> SimulatorConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_time_to_complete(&self, value: Duration) {
        self.config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .time_to_complete = value;
    }

    pub fn task_timing(&self) -> TaskTiming {
        self.config().task_timing()
    }

    pub fn helper_timing(&self) -> TaskTiming {
        self.config().helper_timing()
    }

    /// Apply an update from the façade side, logging tracker errors
    pub fn report(&self, command_id: &CommandId, update: CommandUpdate) {
        if let Err(e) = self.tracker.update_command_info(command_id, update) {
            error!("[{}] {}", self.name, e);
        }
    }
}
