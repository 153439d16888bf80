//! Device profiles
//!
//! A profile decides which commands a device supports and how its
//! observation state starts and recovers.

use cspsim_shared::{DeviceCommand, ObsState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Top-level controller: power and system parameters only
    Controller,
    Subarray,
    /// Subarray that manages receptors instead of generic resources
    MidSubarray,
    /// Observing beam; starts IDLE
    Beam,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    pub kind: DeviceKind,
    /// Without hardware, power commands are rejected
    pub has_hardware: bool,
}

impl DeviceProfile {
    pub fn new(kind: DeviceKind) -> Self {
        Self {
            kind,
            has_hardware: true,
        }
    }

    pub fn without_hardware(mut self) -> Self {
        self.has_hardware = false;
        self
    }

    pub fn supports(&self, command: DeviceCommand) -> bool {
        use DeviceCommand::*;

        if command.is_power_command() {
            return true;
        }

        match self.kind {
            DeviceKind::Controller => command == InitSysParam,
            DeviceKind::Subarray => matches!(
                command,
                AssignResources
                    | ReleaseAllResources
                    | Configure
                    | Scan
                    | EndScan
                    | End
                    | GoToIdle
                    | Abort
                    | ObsReset
                    | Restart
            ),
            DeviceKind::MidSubarray => matches!(
                command,
                AssignResources
                    | ReleaseAllResources
                    | AddReceptors
                    | RemoveAllReceptors
                    | Configure
                    | ConfigureScan
                    | Scan
                    | EndScan
                    | End
                    | GoToIdle
                    | Abort
                    | ObsReset
                    | Restart
            ),
            DeviceKind::Beam => matches!(
                command,
                Configure | ConfigureScan | Scan | EndScan | GoToIdle | Abort | ObsReset | Restart
            ),
        }
    }

    pub fn initial_obs_state(&self) -> ObsState {
        match self.kind {
            DeviceKind::Beam => ObsState::Idle,
            _ => ObsState::Empty,
        }
    }

    /// Observation state a successful Restart settles in
    pub fn restart_target(&self) -> ObsState {
        match self.kind {
            DeviceKind::Beam => ObsState::Idle,
            _ => ObsState::Empty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_commands_supported_everywhere() {
        for kind in [
            DeviceKind::Controller,
            DeviceKind::Subarray,
            DeviceKind::MidSubarray,
            DeviceKind::Beam,
        ] {
            let profile = DeviceProfile::new(kind);
            assert!(profile.supports(DeviceCommand::On));
            assert!(profile.supports(DeviceCommand::Standby));
        }
    }

    #[test]
    fn test_receptor_commands_only_on_mid_subarray() {
        let mid = DeviceProfile::new(DeviceKind::MidSubarray);
        let low = DeviceProfile::new(DeviceKind::Subarray);
        assert!(mid.supports(DeviceCommand::AddReceptors));
        assert!(!low.supports(DeviceCommand::AddReceptors));
        assert!(!low.supports(DeviceCommand::ConfigureScan));
    }

    #[test]
    fn test_beam_profile() {
        let beam = DeviceProfile::new(DeviceKind::Beam);
        assert_eq!(beam.initial_obs_state(), ObsState::Idle);
        assert_eq!(beam.restart_target(), ObsState::Idle);
        assert!(!beam.supports(DeviceCommand::AssignResources));
        assert!(!beam.supports(DeviceCommand::End));
    }

    #[test]
    fn test_controller_profile() {
        let controller = DeviceProfile::new(DeviceKind::Controller).without_hardware();
        assert!(!controller.has_hardware);
        assert!(controller.supports(DeviceCommand::InitSysParam));
        assert!(!controller.supports(DeviceCommand::Configure));
        assert_eq!(controller.initial_obs_state(), ObsState::Empty);
    }
}
