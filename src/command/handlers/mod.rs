//! Command handlers for the different command families

mod observation;
mod power;
mod recovery;
mod resources;
mod sysparam;

pub use observation::{handle_end_scan, handle_observation};
pub use power::handle_power;
pub use recovery::{handle_abort, handle_obs_reset, handle_restart};
pub use resources::handle_resources;
pub use sysparam::handle_init_sys_param;

use cspsim_shared::{
    CommandId, CommandUpdate, CompletionHook, CompletionPolicy, DeviceCommand, Flag, ObsState,
    PollingTask, ResultCode, SimulatedTask, TaskResult, TaskStatus,
};
use tracing::error;

use super::CommandResponse;
use crate::device::DeviceContext;

/// Mark the command QUEUED and hand it to a worker
fn submit(ctx: &DeviceContext, command_id: &CommandId, task: impl SimulatedTask) -> CommandResponse {
    ctx.report(command_id, CommandUpdate::status(TaskStatus::Queued));
    dispatch(ctx, command_id, task, CommandResponse::queued)
}

/// Hand a helper command straight to a worker
fn start(ctx: &DeviceContext, command_id: &CommandId, task: impl SimulatedTask) -> CommandResponse {
    dispatch(ctx, command_id, task, CommandResponse::started)
}

fn dispatch(
    ctx: &DeviceContext,
    command_id: &CommandId,
    task: impl SimulatedTask,
    accepted: fn(&CommandId) -> CommandResponse,
) -> CommandResponse {
    match ctx.runner.dispatch(command_id, task) {
        Ok(()) => accepted(command_id),
        Err(e) => {
            error!("[{}] {}", ctx.name, e);
            let update = CommandUpdate::status(TaskStatus::Failed).with_exception(e.to_string());
            ctx.report(command_id, update);
            CommandResponse::failed(e.to_string())
        }
    }
}

/// Hook settling the observation state when the command completes.
///
/// `abort` is the command's own flag, read when the hook runs.
fn settle_hook(
    ctx: &DeviceContext,
    policy: CompletionPolicy,
    previous: ObsState,
    abort: Flag,
) -> CompletionHook {
    let obs = ctx.obs.clone();

    Box::new(move |result: Option<&TaskResult>| {
        obs.settle(&policy, abort.is_set(), result, previous);
        Ok(())
    })
}

/// Enter the busy state and run a polling task that settles on completion
fn run_observation(
    ctx: &DeviceContext,
    command: DeviceCommand,
    policy: CompletionPolicy,
) -> CommandResponse {
    let signals = ctx.signals.for_command();
    let previous = ctx.obs.begin(&policy);
    let hook = settle_hook(ctx, policy, previous, signals.abort.clone());
    let command_id = ctx.tracker.new_command(command.name(), Some(hook));

    let task =
        PollingTask::new(command.name(), ctx.task_timing(), signals).with_obs(ctx.obs.clone());

    let response = submit(ctx, &command_id, task);
    if response.code == ResultCode::Failed {
        ctx.obs.update(previous);
    }
    response
}
