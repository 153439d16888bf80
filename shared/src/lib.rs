//! CSP Simulator Engine
//!
//! This crate provides the pieces shared by every simulated device: command
//! identity and tracking, simulated asynchronous task execution, and the
//! observation state machine that decides which commands may run.

pub mod command;
pub mod error;
pub mod event;
pub mod runner;
pub mod state_machine;
pub mod tracker;

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types at crate root
pub use command::{CommandId, CommandUpdate, ResultCode, TaskResult, TaskStatus};
pub use error::{CommandError, DispatchError, TrackerError};
pub use event::{EventSink, EventValue};
pub use runner::{
    AbortScope, DeviceSignals, FixedDurationTask, Flag, PollingTask, SimulatedTask, TaskRunner,
    TaskSignals, TaskTiming,
};
pub use state_machine::{
    AdminMode, CompletionPolicy, DeviceCommand, HealthState, LegalityTable, ObsState,
    ObsStateMachine, PowerState,
};
pub use tracker::{CommandTracker, CompletionHook, SweeperHandle, TrackerListener};

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Lock a mutex, recovering the data if a previous holder panicked
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Default timing of the simulated devices
pub mod timing {
    use std::time::Duration;

    /// Total duration of a simulated task
    pub const TIME_TO_COMPLETE: Duration = Duration::from_millis(400);

    /// Upper bound of the random call latency
    pub const TIME_TO_RETURN: Duration = Duration::from_millis(50);

    /// Grace period before a finished command record is purged
    pub const REMOVAL_TIME: Duration = Duration::from_secs(10);

    /// Poll period of state-dependent tasks
    pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Duration of the Abort and EndScan helper tasks
    pub const HELPER_DURATION: Duration = Duration::from_millis(200);

    /// Delay to establish or drop communication with the system under control
    pub const COMMUNICATION_DELAY: Duration = Duration::from_secs(1);

    /// Progress percentages reported by fixed-duration tasks
    pub const PROGRESS_CHECKPOINTS: [u32; 2] = [33, 66];
}
