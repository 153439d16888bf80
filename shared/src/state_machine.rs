//! Observation State Machine
//!
//! Defines which commands are legal in which observation/power state, the
//! state transitions a command drives over its lifecycle, and the guarded
//! holder of a device's current observation state.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::command::TaskResult;
use crate::error::CommandError;
use crate::event::{attr, EventSink, EventValue};
use crate::lock;

/// Observation state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObsState {
    Empty,
    Resourcing,
    Idle,
    Configuring,
    Ready,
    Scanning,
    Aborting,
    Aborted,
    Resetting,
    Fault,
    Restarting,
}

impl fmt::Display for ObsState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObsState::Empty => "EMPTY",
            ObsState::Resourcing => "RESOURCING",
            ObsState::Idle => "IDLE",
            ObsState::Configuring => "CONFIGURING",
            ObsState::Ready => "READY",
            ObsState::Scanning => "SCANNING",
            ObsState::Aborting => "ABORTING",
            ObsState::Aborted => "ABORTED",
            ObsState::Resetting => "RESETTING",
            ObsState::Fault => "FAULT",
            ObsState::Restarting => "RESTARTING",
        };
        f.write_str(name)
    }
}

/// Power (device) state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerState {
    On,
    Off,
    Standby,
    Fault,
    Init,
    Unknown,
    Disable,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PowerState::On => "ON",
            PowerState::Off => "OFF",
            PowerState::Standby => "STANDBY",
            PowerState::Fault => "FAULT",
            PowerState::Init => "INIT",
            PowerState::Unknown => "UNKNOWN",
            PowerState::Disable => "DISABLE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdminMode {
    Online,
    Offline,
    Engineering,
    NotFitted,
    Reserved,
}

impl fmt::Display for AdminMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdminMode::Online => "ONLINE",
            AdminMode::Offline => "OFFLINE",
            AdminMode::Engineering => "ENGINEERING",
            AdminMode::NotFitted => "NOT_FITTED",
            AdminMode::Reserved => "RESERVED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthState {
    Ok,
    Degraded,
    Failed,
    Unknown,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthState::Ok => "OK",
            HealthState::Degraded => "DEGRADED",
            HealthState::Failed => "FAILED",
            HealthState::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Commands a simulated device can be asked to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceCommand {
    On,
    Off,
    Standby,
    InitSysParam,
    AssignResources,
    AddReceptors,
    ReleaseAllResources,
    RemoveAllReceptors,
    Configure,
    ConfigureScan,
    Scan,
    EndScan,
    GoToIdle,
    End,
    Abort,
    Restart,
    ObsReset,
}

impl DeviceCommand {
    pub const ALL: [DeviceCommand; 17] = [
        DeviceCommand::On,
        DeviceCommand::Off,
        DeviceCommand::Standby,
        DeviceCommand::InitSysParam,
        DeviceCommand::AssignResources,
        DeviceCommand::AddReceptors,
        DeviceCommand::ReleaseAllResources,
        DeviceCommand::RemoveAllReceptors,
        DeviceCommand::Configure,
        DeviceCommand::ConfigureScan,
        DeviceCommand::Scan,
        DeviceCommand::EndScan,
        DeviceCommand::GoToIdle,
        DeviceCommand::End,
        DeviceCommand::Abort,
        DeviceCommand::Restart,
        DeviceCommand::ObsReset,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DeviceCommand::On => "On",
            DeviceCommand::Off => "Off",
            DeviceCommand::Standby => "Standby",
            DeviceCommand::InitSysParam => "InitSysParam",
            DeviceCommand::AssignResources => "AssignResources",
            DeviceCommand::AddReceptors => "AddReceptors",
            DeviceCommand::ReleaseAllResources => "ReleaseAllResources",
            DeviceCommand::RemoveAllReceptors => "RemoveAllReceptors",
            DeviceCommand::Configure => "Configure",
            DeviceCommand::ConfigureScan => "ConfigureScan",
            DeviceCommand::Scan => "Scan",
            DeviceCommand::EndScan => "EndScan",
            DeviceCommand::GoToIdle => "GoToIdle",
            DeviceCommand::End => "End",
            DeviceCommand::Abort => "Abort",
            DeviceCommand::Restart => "Restart",
            DeviceCommand::ObsReset => "ObsReset",
        }
    }

    pub fn is_power_command(self) -> bool {
        matches!(self, DeviceCommand::On | DeviceCommand::Off | DeviceCommand::Standby)
    }

    /// Commands whose argument is a JSON document
    pub fn takes_payload(self) -> bool {
        matches!(
            self,
            DeviceCommand::InitSysParam
                | DeviceCommand::AssignResources
                | DeviceCommand::AddReceptors
                | DeviceCommand::Configure
                | DeviceCommand::ConfigureScan
                | DeviceCommand::Scan
        )
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceCommand {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceCommand::ALL
            .into_iter()
            .find(|cmd| cmd.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CommandError::UnknownCommand(s.to_string()))
    }
}

/// Observation states in which a command is legal, or `None` when the
/// command does not depend on the observation state
pub fn default_obs_states(command: DeviceCommand) -> Option<&'static [ObsState]> {
    use DeviceCommand::*;
    use ObsState::*;

    match command {
        On | Off | Standby | InitSysParam => None,
        AssignResources | AddReceptors => Some(&[Empty, Idle]),
        ReleaseAllResources | RemoveAllReceptors => Some(&[Idle]),
        Configure | ConfigureScan => Some(&[Idle, Ready]),
        Scan => Some(&[Ready]),
        EndScan => Some(&[Scanning]),
        GoToIdle | End => Some(&[Ready]),
        Abort => Some(&[Resourcing, Idle, Configuring, Ready, Scanning, Resetting]),
        Restart | ObsReset => Some(&[Fault, Aborted]),
    }
}

/// Power precondition of a command
pub fn power_allows(command: DeviceCommand, power: PowerState) -> bool {
    use PowerState::*;

    match command {
        DeviceCommand::On => !matches!(power, Init | Disable | Fault),
        DeviceCommand::Off | DeviceCommand::Standby => !matches!(power, Init | Disable),
        DeviceCommand::InitSysParam => matches!(power, On | Off | Standby),
        _ => power == On,
    }
}

/// Table of legal observation states per command, with per-device overrides
#[derive(Debug, Clone, Default)]
pub struct LegalityTable {
    overrides: HashMap<DeviceCommand, Vec<ObsState>>,
}

impl LegalityTable {
    /// Replace the legal observation states of one command
    pub fn with_rule(mut self, command: DeviceCommand, states: &[ObsState]) -> Self {
        self.overrides.insert(command, states.to_vec());
        self
    }

    pub fn legal_obs_states(&self, command: DeviceCommand) -> Option<&[ObsState]> {
        match self.overrides.get(&command) {
            Some(states) => Some(states.as_slice()),
            None => default_obs_states(command),
        }
    }

    /// Validate a command against the current observation and power state
    pub fn check(
        &self,
        command: DeviceCommand,
        obs_state: ObsState,
        power_state: PowerState,
    ) -> Result<(), CommandError> {
        let obs_ok = self
            .legal_obs_states(command)
            .map_or(true, |states| states.contains(&obs_state));

        if obs_ok && power_allows(command, power_state) {
            Ok(())
        } else {
            Err(CommandError::NotAllowed {
                command: command.name().to_string(),
                obs_state,
                power_state,
            })
        }
    }
}

/// Check a command against the default legality table
pub fn is_allowed(
    command: DeviceCommand,
    obs_state: ObsState,
    power_state: PowerState,
) -> Result<(), CommandError> {
    LegalityTable::default().check(command, obs_state, power_state)
}

/// Where the observation state goes when a task completes with a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureRoute {
    /// Back to the state held before the command was issued
    Previous,
    To(ObsState),
    Stay,
}

/// Observation-state effects of one command over its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionPolicy {
    pub command: DeviceCommand,
    /// Entered as soon as the command is accepted
    pub busy: Option<ObsState>,
    pub on_success: Option<ObsState>,
    pub on_failure: FailureRoute,
    /// Applied on completion while the abort signal is raised
    pub on_abort: Option<ObsState>,
}

impl CompletionPolicy {
    /// Default lifecycle of the observation commands
    pub fn for_command(command: DeviceCommand) -> Option<Self> {
        use DeviceCommand::*;
        use ObsState::*;

        let (busy, on_success, on_failure, on_abort) = match command {
            On | Off | Standby | InitSysParam => return None,
            AssignResources | AddReceptors => (Some(Resourcing), Some(Idle), FailureRoute::Previous, None),
            ReleaseAllResources | RemoveAllReceptors => {
                (Some(Resourcing), Some(Empty), FailureRoute::Previous, None)
            }
            Configure | ConfigureScan => (Some(Configuring), Some(Ready), FailureRoute::To(Idle), None),
            Scan => (Some(Scanning), Some(Ready), FailureRoute::To(Ready), None),
            EndScan => (None, Some(Ready), FailureRoute::Stay, None),
            GoToIdle | End => (None, Some(Idle), FailureRoute::Previous, None),
            Abort => (Some(Aborting), Some(Aborted), FailureRoute::Stay, Some(Aborted)),
            Restart => (Some(Restarting), Some(Empty), FailureRoute::To(Fault), None),
            ObsReset => (Some(Resetting), Some(Idle), FailureRoute::To(Fault), None),
        };

        Some(Self {
            command,
            busy,
            on_success,
            on_failure,
            on_abort,
        })
    }

    pub fn with_success(mut self, state: ObsState) -> Self {
        self.on_success = Some(state);
        self
    }

    /// Resolve the settled state from the state read at completion time.
    ///
    /// An abort in progress suppresses the success transition, and a FAULT
    /// already entered during execution is never overwritten.
    pub fn resolve(
        &self,
        current: ObsState,
        aborted: bool,
        failed: bool,
        previous: ObsState,
    ) -> Option<ObsState> {
        if aborted {
            return self.on_abort;
        }
        if current == ObsState::Fault {
            return None;
        }
        if failed {
            return match self.on_failure {
                FailureRoute::Previous => Some(previous),
                FailureRoute::To(state) => Some(state),
                FailureRoute::Stay => None,
            };
        }
        self.on_success
    }
}

/// Guarded holder of a device's observation state
pub struct ObsStateMachine {
    current_state: Mutex<ObsState>,
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for ObsStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObsStateMachine")
            .field("current_state", &self.state())
            .finish()
    }
}

impl ObsStateMachine {
    pub fn new(initial: ObsState, sink: Arc<dyn EventSink>) -> Self {
        Self {
            current_state: Mutex::new(initial),
            sink,
        }
    }

    /// Get current state
    pub fn state(&self) -> ObsState {
        *lock(&self.current_state)
    }

    /// Set the state, publishing only when the value changes
    pub fn update(&self, value: ObsState) -> bool {
        let mut state = lock(&self.current_state);
        Self::transition(&mut state, value, self.sink.as_ref())
    }

    /// Enter the command's busy state, returning the state it replaced
    pub fn begin(&self, policy: &CompletionPolicy) -> ObsState {
        let mut state = lock(&self.current_state);
        let previous = *state;
        if let Some(busy) = policy.busy {
            Self::transition(&mut state, busy, self.sink.as_ref());
        }
        previous
    }

    /// Apply the policy's completion transition atomically with the read
    /// of the current state
    pub fn settle(
        &self,
        policy: &CompletionPolicy,
        aborted: bool,
        result: Option<&TaskResult>,
        previous: ObsState,
    ) -> Option<ObsState> {
        let mut state = lock(&self.current_state);
        let failed = result.is_some_and(TaskResult::is_failure);
        let target = policy.resolve(*state, aborted, failed, previous)?;
        Self::transition(&mut state, target, self.sink.as_ref());
        Some(target)
    }

    fn transition(state: &mut ObsState, value: ObsState, sink: &dyn EventSink) -> bool {
        if *state == value {
            return false;
        }
        info!("obsState {} -> {}", state, value);
        *state = value;
        sink.push_event(attr::OBS_STATE, EventValue::Obs(value));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{ResultCode, TaskResult};

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<(String, EventValue)>>,
    }

    impl EventSink for RecordingSink {
        fn push_event(&self, name: &str, value: EventValue) {
            lock(&self.events).push((name.to_string(), value));
        }
    }

    impl RecordingSink {
        fn obs_events(&self) -> Vec<ObsState> {
            lock(&self.events)
                .iter()
                .filter_map(|(_, v)| match v {
                    EventValue::Obs(s) => Some(*s),
                    _ => None,
                })
                .collect()
        }
    }

    fn machine(initial: ObsState) -> (ObsStateMachine, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (ObsStateMachine::new(initial, sink.clone()), sink)
    }

    #[test]
    fn test_legality_table() {
        use DeviceCommand::*;
        use ObsState::*;

        let on = PowerState::On;
        assert!(is_allowed(AssignResources, Empty, on).is_ok());
        assert!(is_allowed(AssignResources, Idle, on).is_ok());
        assert!(is_allowed(AssignResources, Ready, on).is_err());
        assert!(is_allowed(ReleaseAllResources, Idle, on).is_ok());
        assert!(is_allowed(ReleaseAllResources, Empty, on).is_err());
        assert!(is_allowed(Configure, Idle, on).is_ok());
        assert!(is_allowed(ConfigureScan, Ready, on).is_ok());
        assert!(is_allowed(Configure, Empty, on).is_err());
        assert!(is_allowed(Scan, Ready, on).is_ok());
        assert!(is_allowed(Scan, Idle, on).is_err());
        assert!(is_allowed(EndScan, Scanning, on).is_ok());
        assert!(is_allowed(EndScan, Ready, on).is_err());
        assert!(is_allowed(End, Ready, on).is_ok());
        assert!(is_allowed(GoToIdle, Idle, on).is_err());
        assert!(is_allowed(Restart, Fault, on).is_ok());
        assert!(is_allowed(ObsReset, Aborted, on).is_ok());
        assert!(is_allowed(Restart, Idle, on).is_err());
    }

    #[test]
    fn test_abort_legal_states() {
        let legal = [
            ObsState::Resourcing,
            ObsState::Idle,
            ObsState::Configuring,
            ObsState::Ready,
            ObsState::Scanning,
            ObsState::Resetting,
        ];
        for state in legal {
            assert!(is_allowed(DeviceCommand::Abort, state, PowerState::On).is_ok());
        }
        for state in [ObsState::Empty, ObsState::Aborted, ObsState::Fault, ObsState::Aborting] {
            assert!(is_allowed(DeviceCommand::Abort, state, PowerState::On).is_err());
        }
    }

    #[test]
    fn test_observing_commands_require_power_on() {
        let result = is_allowed(DeviceCommand::Configure, ObsState::Idle, PowerState::Off);
        assert_eq!(
            result,
            Err(CommandError::NotAllowed {
                command: "Configure".into(),
                obs_state: ObsState::Idle,
                power_state: PowerState::Off,
            })
        );
    }

    #[test]
    fn test_power_commands_ignore_obs_state() {
        assert!(is_allowed(DeviceCommand::On, ObsState::Fault, PowerState::Off).is_ok());
        assert!(is_allowed(DeviceCommand::On, ObsState::Empty, PowerState::Fault).is_err());
        assert!(is_allowed(DeviceCommand::On, ObsState::Empty, PowerState::Init).is_err());
        assert!(is_allowed(DeviceCommand::Off, ObsState::Empty, PowerState::Fault).is_ok());
        assert!(is_allowed(DeviceCommand::Off, ObsState::Empty, PowerState::Init).is_err());
        assert!(is_allowed(DeviceCommand::Standby, ObsState::Empty, PowerState::Disable).is_err());
    }

    #[test]
    fn test_error_names_offending_states() {
        let err = is_allowed(DeviceCommand::Scan, ObsState::Idle, PowerState::On).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Scan"));
        assert!(message.contains("IDLE"));
        assert!(message.contains("ON"));
    }

    #[test]
    fn test_legality_override() {
        let table = LegalityTable::default().with_rule(DeviceCommand::Scan, &[ObsState::Idle]);
        assert!(table.check(DeviceCommand::Scan, ObsState::Idle, PowerState::On).is_ok());
        assert!(table.check(DeviceCommand::Scan, ObsState::Ready, PowerState::On).is_err());
    }

    #[test]
    fn test_parse_command_name() {
        assert_eq!("configure".parse::<DeviceCommand>(), Ok(DeviceCommand::Configure));
        assert_eq!("GoToIdle".parse::<DeviceCommand>(), Ok(DeviceCommand::GoToIdle));
        assert!(matches!(
            "Fly".parse::<DeviceCommand>(),
            Err(CommandError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_update_is_idempotent() {
        let (fsm, sink) = machine(ObsState::Idle);
        assert!(!fsm.update(ObsState::Idle));
        assert!(sink.obs_events().is_empty());

        assert!(fsm.update(ObsState::Ready));
        assert!(!fsm.update(ObsState::Ready));
        assert_eq!(sink.obs_events(), vec![ObsState::Ready]);
    }

    #[test]
    fn test_configure_lifecycle() {
        let (fsm, sink) = machine(ObsState::Idle);
        let policy = CompletionPolicy::for_command(DeviceCommand::Configure).unwrap();

        let previous = fsm.begin(&policy);
        assert_eq!(previous, ObsState::Idle);
        assert_eq!(fsm.state(), ObsState::Configuring);

        let settled = fsm.settle(&policy, false, Some(&TaskResult::ok("configure")), previous);
        assert_eq!(settled, Some(ObsState::Ready));
        assert_eq!(sink.obs_events(), vec![ObsState::Configuring, ObsState::Ready]);
    }

    #[test]
    fn test_abort_suppresses_success_transition() {
        let (fsm, _sink) = machine(ObsState::Idle);
        let policy = CompletionPolicy::for_command(DeviceCommand::Configure).unwrap();
        let previous = fsm.begin(&policy);
        fsm.update(ObsState::Aborting);

        let settled = fsm.settle(&policy, true, None, previous);
        assert_eq!(settled, None);
        assert_eq!(fsm.state(), ObsState::Aborting);
    }

    #[test]
    fn test_abort_command_settles_while_aborted() {
        let (fsm, _sink) = machine(ObsState::Ready);
        let policy = CompletionPolicy::for_command(DeviceCommand::Abort).unwrap();
        let previous = fsm.begin(&policy);
        assert_eq!(fsm.state(), ObsState::Aborting);

        assert_eq!(fsm.settle(&policy, true, None, previous), Some(ObsState::Aborted));
    }

    #[test]
    fn test_failure_routes() {
        let failed = TaskResult::new(ResultCode::Failed, "boom");

        let (fsm, _) = machine(ObsState::Ready);
        let configure = CompletionPolicy::for_command(DeviceCommand::Configure).unwrap();
        let previous = fsm.begin(&configure);
        assert_eq!(fsm.settle(&configure, false, Some(&failed), previous), Some(ObsState::Idle));

        let (fsm, _) = machine(ObsState::Idle);
        let assign = CompletionPolicy::for_command(DeviceCommand::AssignResources).unwrap();
        let previous = fsm.begin(&assign);
        assert_eq!(fsm.settle(&assign, false, Some(&failed), previous), Some(ObsState::Idle));
    }

    #[test]
    fn test_fault_entered_during_execution_is_kept() {
        let (fsm, _) = machine(ObsState::Ready);
        let scan = CompletionPolicy::for_command(DeviceCommand::Scan).unwrap();
        let previous = fsm.begin(&scan);
        fsm.update(ObsState::Fault);

        let failed = TaskResult::failed("scan");
        assert_eq!(fsm.settle(&scan, false, Some(&failed), previous), None);
        assert_eq!(fsm.state(), ObsState::Fault);
    }

    #[test]
    fn test_power_commands_have_no_obs_policy() {
        assert!(CompletionPolicy::for_command(DeviceCommand::On).is_none());
        assert!(CompletionPolicy::for_command(DeviceCommand::InitSysParam).is_none());
    }
}
