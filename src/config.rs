//! Simulator and device configuration

use std::time::Duration;

use cspsim_shared::{timing, TaskTiming};

use crate::device::{DeviceKind, DeviceProfile};

/// Timing knobs of the simulated devices
#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Duration of a simulated task
    pub time_to_complete: Duration,
    /// Upper bound of the random call latency
    pub time_to_return: Duration,
    /// Grace period before a finished command record is purged
    pub removal_time: Duration,
    /// Progress percentages reported by fixed-duration tasks
    pub progress_checkpoints: Vec<u32>,
    pub poll_interval: Duration,
    /// Duration of the Abort and EndScan helper tasks
    pub helper_duration: Duration,
    /// Delay to establish or drop communication after an admin mode write
    pub communication_delay: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            time_to_complete: timing::TIME_TO_COMPLETE,
            time_to_return: timing::TIME_TO_RETURN,
            removal_time: timing::REMOVAL_TIME,
            progress_checkpoints: timing::PROGRESS_CHECKPOINTS.to_vec(),
            poll_interval: timing::POLL_INTERVAL,
            helper_duration: timing::HELPER_DURATION,
            communication_delay: timing::COMMUNICATION_DELAY,
        }
    }
}

impl SimulatorConfig {
    /// Timing snapshot for a long-running command
    pub fn task_timing(&self) -> TaskTiming {
        TaskTiming {
            time_to_complete: self.time_to_complete,
            time_to_return: self.time_to_return,
            progress_checkpoints: self.progress_checkpoints.clone(),
            poll_interval: self.poll_interval,
        }
    }

    /// Timing snapshot for the Abort and EndScan helpers
    pub fn helper_timing(&self) -> TaskTiming {
        TaskTiming {
            poll_interval: self.poll_interval,
            ..TaskTiming::helper(self.helper_duration, self.time_to_return)
        }
    }
}

/// Configuration of one simulated device
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Device name, used in logs and error messages
    pub name: String,
    pub profile: DeviceProfile,
    pub simulator: SimulatorConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "sim-csp/subarray/01".into(),
            profile: DeviceProfile::new(DeviceKind::Subarray),
            simulator: SimulatorConfig::default(),
        }
    }
}

impl DeviceConfig {
    pub fn new(name: impl Into<String>, profile: DeviceProfile) -> Self {
        Self {
            name: name.into(),
            profile,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_timing_follows_config() {
        let config = SimulatorConfig {
            time_to_complete: Duration::from_secs(2),
            progress_checkpoints: vec![10, 50, 90],
            ..Default::default()
        };

        let timing = config.task_timing();
        assert_eq!(timing.time_to_complete, Duration::from_secs(2));
        assert_eq!(timing.progress_checkpoints, vec![10, 50, 90]);
        assert_eq!(timing.time_to_return, config.time_to_return);
    }

    #[test]
    fn test_helper_timing_has_no_checkpoints() {
        let timing = SimulatorConfig::default().helper_timing();
        assert_eq!(timing.time_to_complete, Duration::from_millis(200));
        assert!(timing.progress_checkpoints.is_empty());
    }
}
