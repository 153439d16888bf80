//! Simulated task execution
//!
//! Every accepted command runs as its own tokio task. The task sleeps a
//! random call latency, then drives the command through the tracker as the
//! real hardware would: `IN_PROGRESS`, progress checkpoints, a terminal
//! status. Cancellation and fault injection are cooperative flags checked
//! between sleeps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::runtime::Handle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::command::{CommandId, CommandUpdate, TaskResult, TaskStatus};
use crate::error::DispatchError;
use crate::state_machine::{ObsState, ObsStateMachine};
use crate::{lock, timing};
use crate::tracker::CommandTracker;

/// Settable/clearable signal shared between a device and its workers
#[derive(Debug, Clone, Default)]
pub struct Flag(Arc<AtomicBool>);

impl Flag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag, returning whether it was set
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    /// Whether a clone other than this one is still alive
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.0) > 1
    }
}

/// Signals a running task checks at each checkpoint or poll
#[derive(Debug, Clone, Default)]
pub struct TaskSignals {
    pub abort: Flag,
    pub end: Flag,
    /// One-shot: drives the observation state to FAULT
    pub obs_faulty: Flag,
    /// Persistent: every task observing it completes with a failure
    pub faulty_in_command: Flag,
}

/// Abort flags of the commands issued on one device.
///
/// Each command gets its own flag. Raising the scope sets every flag still
/// held by a task or hook; flags issued afterwards start lowered, so a later
/// invocation never un-aborts an earlier command.
#[derive(Debug, Clone, Default)]
pub struct AbortScope {
    issued: Arc<Mutex<Vec<Flag>>>,
}

impl AbortScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// New lowered flag, raised by the next `raise`
    pub fn issue(&self) -> Flag {
        let flag = Flag::new();
        let mut issued = lock(&self.issued);
        issued.retain(|f| f.in_use());
        issued.push(flag.clone());
        flag
    }

    /// Raise every live flag, returning how many were raised
    pub fn raise(&self) -> usize {
        let mut issued = lock(&self.issued);
        issued.retain(|f| f.in_use());
        for flag in issued.iter() {
            flag.set();
        }
        issued.len()
    }
}

/// Device-wide signals, from which each command's `TaskSignals` are cut
#[derive(Debug, Clone, Default)]
pub struct DeviceSignals {
    pub aborts: AbortScope,
    pub end: Flag,
    /// One-shot: drives the observation state to FAULT
    pub obs_faulty: Flag,
    /// Persistent: every task observing it completes with a failure
    pub faulty_in_command: Flag,
}

impl DeviceSignals {
    /// Signals for a newly issued command, with its own abort flag
    pub fn for_command(&self) -> TaskSignals {
        TaskSignals {
            abort: self.aborts.issue(),
            end: self.end.clone(),
            obs_faulty: self.obs_faulty.clone(),
            faulty_in_command: self.faulty_in_command.clone(),
        }
    }
}

/// Timing snapshot taken when a task is created
#[derive(Debug, Clone, PartialEq)]
pub struct TaskTiming {
    pub time_to_complete: Duration,
    /// Upper bound of the random call latency
    pub time_to_return: Duration,
    pub progress_checkpoints: Vec<u32>,
    pub poll_interval: Duration,
}

impl Default for TaskTiming {
    fn default() -> Self {
        Self {
            time_to_complete: timing::TIME_TO_COMPLETE,
            time_to_return: timing::TIME_TO_RETURN,
            progress_checkpoints: timing::PROGRESS_CHECKPOINTS.to_vec(),
            poll_interval: timing::POLL_INTERVAL,
        }
    }
}

impl TaskTiming {
    /// Short fixed-length timing used by the Abort and EndScan helpers
    pub fn helper(duration: Duration, time_to_return: Duration) -> Self {
        Self {
            time_to_complete: duration,
            time_to_return,
            progress_checkpoints: Vec::new(),
            poll_interval: timing::POLL_INTERVAL,
        }
    }
}

/// Reports one command's transitions to the tracker.
///
/// Update errors are logged here; they never reach the worker.
pub struct TaskReporter {
    tracker: Arc<CommandTracker>,
    command_id: CommandId,
}

impl TaskReporter {
    pub fn new(tracker: Arc<CommandTracker>, command_id: CommandId) -> Self {
        Self { tracker, command_id }
    }

    pub fn command_id(&self) -> &CommandId {
        &self.command_id
    }

    pub fn report(&self, update: CommandUpdate) {
        if let Err(e) = self.tracker.update_command_info(&self.command_id, update) {
            error!("Worker for {} could not report: {}", self.command_id, e);
        }
    }

    fn in_progress(&self) {
        self.report(CommandUpdate::status(TaskStatus::InProgress));
    }

    fn aborted(&self, command_name: &str) {
        info!("{} aborted", self.command_id);
        self.report(CommandUpdate::finished(
            TaskStatus::Aborted,
            TaskResult::aborted(command_name),
        ));
    }

    fn completed(&self, result: TaskResult) {
        self.report(CommandUpdate::finished(TaskStatus::Completed, result));
    }

    fn completed_with_fault(&self, command_name: &str) {
        warn!("{} hit an injected fault", self.command_id);
        let update = CommandUpdate::finished(TaskStatus::Completed, TaskResult::failed(command_name))
            .with_exception(format!("{command_name} failed: fault injected in command"));
        self.report(update);
    }
}

/// Body of a simulated long-running command
#[async_trait]
pub trait SimulatedTask: Send + Sync + 'static {
    fn timing(&self) -> &TaskTiming;

    async fn run(&self, reporter: &TaskReporter);
}

/// Task that runs for a fixed time, reporting progress at checkpoints
pub struct FixedDurationTask {
    command_name: String,
    timing: TaskTiming,
    signals: TaskSignals,
}

impl FixedDurationTask {
    pub fn new(command_name: &str, timing: TaskTiming, signals: TaskSignals) -> Self {
        Self {
            command_name: command_name.to_string(),
            timing,
            signals,
        }
    }
}

#[async_trait]
impl SimulatedTask for FixedDurationTask {
    fn timing(&self) -> &TaskTiming {
        &self.timing
    }

    async fn run(&self, reporter: &TaskReporter) {
        reporter.in_progress();
        if self.signals.abort.is_set() {
            reporter.aborted(&self.command_name);
            return;
        }

        let checkpoints = &self.timing.progress_checkpoints;
        let segment = self.timing.time_to_complete / (checkpoints.len() as u32 + 1);

        for &checkpoint in checkpoints {
            sleep(segment).await;
            if self.signals.abort.is_set() {
                reporter.aborted(&self.command_name);
                return;
            }
            reporter.report(CommandUpdate::progress(checkpoint));
        }

        sleep(segment).await;
        if self.signals.abort.is_set() {
            reporter.aborted(&self.command_name);
            return;
        }

        if self.signals.faulty_in_command.is_set() {
            reporter.completed_with_fault(&self.command_name);
        } else {
            reporter.completed(TaskResult::ok(&self.command_name));
        }
    }
}

/// Task whose outcome depends on signals raised while it runs
pub struct PollingTask {
    command_name: String,
    timing: TaskTiming,
    signals: TaskSignals,
    obs: Option<Arc<ObsStateMachine>>,
    result: TaskResult,
}

impl PollingTask {
    pub fn new(command_name: &str, timing: TaskTiming, signals: TaskSignals) -> Self {
        Self {
            command_name: command_name.to_string(),
            timing,
            signals,
            obs: None,
            result: TaskResult::ok(command_name),
        }
    }

    /// Observation state driven to ABORTED or FAULT by the signals
    pub fn with_obs(mut self, obs: Arc<ObsStateMachine>) -> Self {
        self.obs = Some(obs);
        self
    }

    fn set_obs(&self, state: ObsState) {
        if let Some(obs) = &self.obs {
            obs.update(state);
        }
    }
}

#[async_trait]
impl SimulatedTask for PollingTask {
    fn timing(&self) -> &TaskTiming {
        &self.timing
    }

    async fn run(&self, reporter: &TaskReporter) {
        reporter.in_progress();
        let deadline = Instant::now() + self.timing.time_to_complete;

        loop {
            if self.signals.end.is_set() {
                debug!("{} ended early", reporter.command_id());
                reporter.completed(self.result.clone());
                return;
            }

            if self.signals.abort.is_set() {
                reporter.aborted(&self.command_name);
                self.set_obs(ObsState::Aborted);
                return;
            }

            if self.signals.obs_faulty.is_set() {
                // FAULT first, so the completion policy keeps it
                self.set_obs(ObsState::Fault);
                reporter.completed(TaskResult::failed(&self.command_name));
                self.signals.obs_faulty.clear();
                return;
            }

            if self.signals.faulty_in_command.is_set() {
                reporter.completed_with_fault(&self.command_name);
                return;
            }

            if Instant::now() >= deadline {
                break;
            }
            sleep(self.timing.poll_interval).await;
        }

        reporter.completed(self.result.clone());
    }
}

/// Spawns simulated tasks reporting to one tracker
#[derive(Clone)]
pub struct TaskRunner {
    tracker: Arc<CommandTracker>,
}

impl TaskRunner {
    pub fn new(tracker: Arc<CommandTracker>) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &Arc<CommandTracker> {
        &self.tracker
    }

    /// Random call latency, uniform in `[0, time_to_return]`
    pub fn call_latency(time_to_return: Duration) -> Duration {
        rand::thread_rng().gen_range(Duration::ZERO..=time_to_return)
    }

    /// Start `task` on its own worker and return immediately.
    ///
    /// Fails only when called outside a tokio runtime.
    pub fn dispatch(
        &self,
        command_id: &CommandId,
        task: impl SimulatedTask,
    ) -> Result<(), DispatchError> {
        let handle =
            Handle::try_current().map_err(|_| DispatchError::NoRuntime(command_id.clone()))?;
        let reporter = TaskReporter::new(self.tracker.clone(), command_id.clone());

        handle.spawn(async move {
            sleep(Self::call_latency(task.timing().time_to_return)).await;
            task.run(&reporter).await;
            debug!("Worker for {} finished", reporter.command_id());
        });
        Ok(())
    }
}
