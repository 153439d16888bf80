//! The boundary through which the engine publishes change events

use std::fmt;

use crate::state_machine::{AdminMode, HealthState, ObsState, PowerState};

/// Value carried by a named change event
#[derive(Debug, Clone, PartialEq)]
pub enum EventValue {
    Power(PowerState),
    Admin(AdminMode),
    Health(HealthState),
    Obs(ObsState),
    /// Flattened string sequence, e.g. `[id, STATUS, id, STATUS]`
    Strings(Vec<String>),
    /// `(command id, payload)` pair
    Pair(String, String),
}

impl fmt::Display for EventValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventValue::Power(v) => write!(f, "{v}"),
            EventValue::Admin(v) => write!(f, "{v}"),
            EventValue::Health(v) => write!(f, "{v}"),
            EventValue::Obs(v) => write!(f, "{v}"),
            EventValue::Strings(items) => write!(f, "({})", items.join(", ")),
            EventValue::Pair(a, b) => write!(f, "({a}, {b})"),
        }
    }
}

/// Fire-and-forget publication of a named event.
///
/// Implementations must not block: the engine calls this while holding
/// its state locks so that event order matches mutation order.
pub trait EventSink: Send + Sync {
    fn push_event(&self, name: &str, value: EventValue);
}

/// Names of the attributes whose changes are published
pub mod attr {
    pub const STATE: &str = "state";
    pub const ADMIN_MODE: &str = "adminMode";
    pub const HEALTH_STATE: &str = "healthState";
    pub const OBS_STATE: &str = "obsState";
    pub const COMMANDS_IN_QUEUE: &str = "longRunningCommandsInQueue";
    pub const COMMAND_IDS_IN_QUEUE: &str = "longRunningCommandIDsInQueue";
    pub const COMMAND_STATUS: &str = "longRunningCommandStatus";
    pub const COMMAND_PROGRESS: &str = "longRunningCommandProgress";
    pub const COMMAND_RESULT: &str = "longRunningCommandResult";
}
