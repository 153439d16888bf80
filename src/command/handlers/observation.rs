//! Observation command handlers (configure, scan, end)

use cspsim_shared::{CompletionPolicy, DeviceCommand, FixedDurationTask, TaskSignals};
use serde_json::Value;
use tracing::info;

use super::{run_observation, settle_hook, start};
use crate::command::CommandResponse;
use crate::device::DeviceContext;

/// Handle Configure, ConfigureScan, Scan, GoToIdle and End
pub fn handle_observation(
    ctx: &DeviceContext,
    command: DeviceCommand,
    policy: CompletionPolicy,
    payload: Option<&Value>,
) -> CommandResponse {
    if let Some(id) = payload.and_then(|p| p.get("id").or_else(|| p.get("scan_id"))) {
        info!("[{}] {} id={}", ctx.name, command, id);
    }
    run_observation(ctx, command, policy)
}

/// Handle EndScan: signal the running scan to end and run a short helper
pub fn handle_end_scan(ctx: &DeviceContext, policy: CompletionPolicy) -> CommandResponse {
    let command = DeviceCommand::EndScan;
    ctx.signals.end.set();

    let signals = TaskSignals {
        abort: ctx.signals.aborts.issue(),
        ..TaskSignals::default()
    };
    let previous = ctx.obs.begin(&policy);
    let hook = settle_hook(ctx, policy, previous, signals.abort.clone());
    let command_id = ctx.tracker.new_command(command.name(), Some(hook));

    let task = FixedDurationTask::new(command.name(), ctx.helper_timing(), signals);
    start(ctx, &command_id, task)
}
