//! Recovery command handlers (abort, restart, reset)

use cspsim_shared::{CompletionPolicy, DeviceCommand, FixedDurationTask, TaskSignals};
use tracing::warn;

use super::{run_observation, settle_hook, start};
use crate::command::CommandResponse;
use crate::device::DeviceContext;

/// Handle Abort: raise the abort signal for running tasks and run a short
/// helper that settles the device in ABORTED
pub fn handle_abort(ctx: &DeviceContext, policy: CompletionPolicy) -> CommandResponse {
    let command = DeviceCommand::Abort;
    let previous = ctx.obs.begin(&policy);
    let raised = ctx.signals.aborts.raise();
    warn!("[{}] Aborting {} running commands", ctx.name, raised);

    // Issued after the raise, so the helper does not see its own abort
    let signals = TaskSignals {
        abort: ctx.signals.aborts.issue(),
        ..TaskSignals::default()
    };
    let hook = settle_hook(ctx, policy, previous, signals.abort.clone());
    let command_id = ctx.tracker.new_command(command.name(), Some(hook));

    let task = FixedDurationTask::new(command.name(), ctx.helper_timing(), signals);
    start(ctx, &command_id, task)
}

/// Handle Restart: back to the profile's restart state, FAULT on failure
pub fn handle_restart(ctx: &DeviceContext, policy: CompletionPolicy) -> CommandResponse {
    let policy = policy.with_success(ctx.profile.restart_target());
    run_observation(ctx, DeviceCommand::Restart, policy)
}

/// Handle ObsReset: back to IDLE, FAULT on failure
pub fn handle_obs_reset(ctx: &DeviceContext, policy: CompletionPolicy) -> CommandResponse {
    run_observation(ctx, DeviceCommand::ObsReset, policy)
}
