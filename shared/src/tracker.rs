//! Command tracker - registry of in-flight and recently finished commands
//!
//! The tracker is the single source of truth for the status, progress,
//! result and exception of every command a device has accepted. All
//! accessors take the same lock and return snapshots; subscribers are
//! notified under that lock so notification order matches update order.
//! Finished records are purged by a background sweeper once their grace
//! period has elapsed.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, warn};

use crate::command::{CommandId, CommandUpdate, TaskResult, TaskStatus};
use crate::error::TrackerError;
use crate::{lock, timing};

/// Invoked once when a command reaches `COMPLETED`, with the result
/// reported alongside that status (if any).
///
/// Runs under the tracker lock and must not call back into the tracker.
pub type CompletionHook = Box<dyn FnOnce(Option<&TaskResult>) -> anyhow::Result<()> + Send>;

/// Subscriber to tracker changes.
///
/// Callbacks run under the tracker lock, so they must be quick and must not
/// call back into the tracker. Errors are logged and never abort an update.
pub trait TrackerListener: Send + Sync {
    /// `(id, name)` of every tracked command, in insertion order
    fn queue_changed(&self, queue: &[(CommandId, String)]) -> anyhow::Result<()>;

    /// `(id, status)` of every tracked command, in insertion order
    fn status_changed(&self, statuses: &[(CommandId, TaskStatus)]) -> anyhow::Result<()>;

    /// `(id, progress)` of every command currently reporting progress
    fn progress_changed(&self, progresses: &[(CommandId, u32)]) -> anyhow::Result<()>;

    fn result_reported(&self, command_id: &CommandId, result: &TaskResult) -> anyhow::Result<()>;

    fn exception_raised(&self, _command_id: &CommandId, _exception: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

struct CommandRecord {
    id: CommandId,
    name: String,
    status: TaskStatus,
    progress: Option<u32>,
    completion_hook: Option<CompletionHook>,
}

#[derive(Default)]
struct TrackerState {
    /// Insertion order is the queue order
    commands: Vec<CommandRecord>,
    removals: BinaryHeap<Reverse<(Instant, CommandId)>>,
    most_recent_result: Option<(CommandId, TaskResult)>,
    most_recent_exception: Option<(CommandId, String)>,
}

impl TrackerState {
    fn position(&self, command_id: &CommandId) -> Option<usize> {
        self.commands.iter().position(|c| &c.id == command_id)
    }

    fn queue(&self) -> Vec<(CommandId, String)> {
        self.commands
            .iter()
            .map(|c| (c.id.clone(), c.name.clone()))
            .collect()
    }

    fn statuses(&self) -> Vec<(CommandId, TaskStatus)> {
        self.commands.iter().map(|c| (c.id.clone(), c.status)).collect()
    }

    fn progresses(&self) -> Vec<(CommandId, u32)> {
        self.commands
            .iter()
            .filter_map(|c| c.progress.map(|p| (c.id.clone(), p)))
            .collect()
    }
}

/// Thread-safe registry of commands
pub struct CommandTracker {
    state: Mutex<TrackerState>,
    listener: Arc<dyn TrackerListener>,
    removal_time: Duration,
    /// Wakes the sweeper when a new removal deadline is scheduled
    sweep: Arc<Notify>,
    /// Wakes `wait_for_terminal` callers
    terminal: Notify,
}

impl fmt::Debug for CommandTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandTracker")
            .field("commands", &self.command_statuses())
            .field("removal_time", &self.removal_time)
            .finish()
    }
}

impl CommandTracker {
    pub fn new(listener: Arc<dyn TrackerListener>) -> Self {
        Self::with_removal_time(listener, timing::REMOVAL_TIME)
    }

    pub fn with_removal_time(listener: Arc<dyn TrackerListener>, removal_time: Duration) -> Self {
        Self {
            state: Mutex::new(TrackerState::default()),
            listener,
            removal_time,
            sweep: Arc::new(Notify::new()),
            terminal: Notify::new(),
        }
    }

    /// Register a new command in `STAGING` and return its id
    pub fn new_command(&self, command_name: &str, completion_hook: Option<CompletionHook>) -> CommandId {
        let command_id = CommandId::generate(command_name);

        let mut state = lock(&self.state);
        state.commands.push(CommandRecord {
            id: command_id.clone(),
            name: command_name.to_string(),
            status: TaskStatus::Staging,
            progress: None,
            completion_hook,
        });
        let queue = state.queue();
        report("queue", self.listener.queue_changed(&queue));
        drop(state);

        debug!("New command {}", command_id);
        command_id
    }

    /// Apply any subset of status/progress/result/exception atomically.
    ///
    /// Side effects run in order: exception, result, progress, status. A
    /// `COMPLETED` status runs the completion hook; any terminal status
    /// clears progress and schedules removal after the grace period.
    pub fn update_command_info(
        &self,
        command_id: &CommandId,
        update: CommandUpdate,
    ) -> Result<(), TrackerError> {
        debug!("Received update for {}: {:?}", command_id, update);

        let mut state = lock(&self.state);
        let Some(index) = state.position(command_id) else {
            error!("Update for untracked command {}", command_id);
            return Err(TrackerError::UnknownCommand(command_id.clone()));
        };

        if let Some(exception) = &update.exception {
            state.most_recent_exception = Some((command_id.clone(), exception.clone()));
            report("exception", self.listener.exception_raised(command_id, exception));
        }

        if let Some(result) = &update.result {
            state.most_recent_result = Some((command_id.clone(), result.clone()));
            report("result", self.listener.result_reported(command_id, result));
        }

        if let Some(progress) = update.progress {
            state.commands[index].progress = Some(progress);
            let progresses = state.progresses();
            report("progress", self.listener.progress_changed(&progresses));
        }

        let mut finished = false;
        if let Some(status) = update.status {
            state.commands[index].status = status;
            let statuses = state.statuses();
            report("status", self.listener.status_changed(&statuses));

            if status == TaskStatus::Completed {
                if let Some(hook) = state.commands[index].completion_hook.take() {
                    if let Err(e) = hook(update.result.as_ref()) {
                        warn!("Completion hook of {} failed: {:#}", command_id, e);
                    }
                }
            }

            if status.is_terminal() {
                state.commands[index].progress = None;
                let deadline = Instant::now() + self.removal_time;
                state.removals.push(Reverse((deadline, command_id.clone())));
                finished = true;
            }
        }
        drop(state);

        if finished {
            self.sweep.notify_one();
            self.terminal.notify_waiters();
        }
        Ok(())
    }

    /// Remove every finished record whose grace period ended at `now`.
    ///
    /// Returns the number of records removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut state = lock(&self.state);
        let mut removed = 0;

        while let Some(Reverse((deadline, _))) = state.removals.peek() {
            if *deadline > now {
                break;
            }
            let Some(Reverse((_, command_id))) = state.removals.pop() else {
                break;
            };
            if let Some(index) = state.position(&command_id) {
                state.commands.remove(index);
                removed += 1;
                debug!("Removed finished command {}", command_id);
            }
        }

        if removed > 0 {
            let queue = state.queue();
            report("queue", self.listener.queue_changed(&queue));
        }
        removed
    }

    /// Earliest pending removal deadline
    pub fn next_removal(&self) -> Option<Instant> {
        lock(&self.state).removals.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Start the background task that purges finished records.
    ///
    /// The sweeper sleeps until the earliest deadline instead of running a
    /// timer per record. It holds only a weak reference to the tracker.
    pub fn start_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let tracker = Arc::downgrade(self);
        let wake = self.sweep.clone();

        let task = tokio::spawn(async move {
            loop {
                let next = match tracker.upgrade() {
                    Some(tracker) => tracker.next_removal(),
                    None => break,
                };

                match next {
                    Some(deadline) => {
                        tokio::select! {
                            _ = sleep_until(deadline) => {}
                            _ = wake.notified() => continue,
                        }
                    }
                    None => {
                        wake.notified().await;
                        continue;
                    }
                }

                match tracker.upgrade() {
                    Some(tracker) => {
                        tracker.purge_expired(Instant::now());
                    }
                    None => break,
                }
            }
            debug!("Removal sweeper stopped");
        });

        SweeperHandle { task }
    }

    /// Wait until the command reaches a terminal status (or is unknown)
    pub async fn wait_for_terminal(&self, command_id: &CommandId) -> TaskStatus {
        loop {
            let notified = self.terminal.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let status = self.get_command_status(command_id);
            if status.is_terminal() || status == TaskStatus::NotFound {
                return status;
            }
            notified.await;
        }
    }

    /// `(id, name)` of every tracked command, ordered by invocation
    pub fn commands_in_queue(&self) -> Vec<(CommandId, String)> {
        lock(&self.state).queue()
    }

    /// `(id, status)` of every tracked command, ordered by invocation
    pub fn command_statuses(&self) -> Vec<(CommandId, TaskStatus)> {
        lock(&self.state).statuses()
    }

    /// `(id, progress)` of the commands currently reporting progress
    pub fn command_progresses(&self) -> Vec<(CommandId, u32)> {
        lock(&self.state).progresses()
    }

    /// Result of the command that most recently reported one
    pub fn command_result(&self) -> Option<(CommandId, TaskResult)> {
        lock(&self.state).most_recent_result.clone()
    }

    /// Most recent exception raised by a running command
    pub fn command_exception(&self) -> Option<(CommandId, String)> {
        lock(&self.state).most_recent_exception.clone()
    }

    /// Current status of a command, `NOT_FOUND` for unknown or purged ids
    pub fn get_command_status(&self, command_id: &CommandId) -> TaskStatus {
        let state = lock(&self.state);
        state
            .position(command_id)
            .map_or(TaskStatus::NotFound, |index| state.commands[index].status)
    }
}

/// Keeps the removal sweeper alive; stops it when dropped
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn report(kind: &str, outcome: anyhow::Result<()>) {
    if let Err(e) = outcome {
        warn!("Tracker {} subscriber failed: {:#}", kind, e);
    }
}
