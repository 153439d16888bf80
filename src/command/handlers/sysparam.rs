//! InitSysParam handler

use cspsim_shared::{CompletionHook, DeviceCommand, FixedDurationTask, TaskResult};
use serde_json::Value;
use tracing::info;

use super::submit;
use crate::command::CommandResponse;
use crate::device::DeviceContext;

/// Load the system parameters once the task completes
pub fn handle_init_sys_param(ctx: &DeviceContext, payload: Option<&Value>) -> CommandResponse {
    let command = DeviceCommand::InitSysParam;
    let sys_param = payload.map(Value::to_string).unwrap_or_default();

    let attributes = ctx.attributes.clone();
    let device = ctx.name.clone();
    let hook: CompletionHook = Box::new(move |result: Option<&TaskResult>| {
        if !result.is_some_and(TaskResult::is_failure) {
            info!("[{}] System parameters loaded", device);
            attributes.set_sys_param(sys_param);
        }
        Ok(())
    });

    let command_id = ctx.tracker.new_command(command.name(), Some(hook));
    let signals = ctx.signals.for_command();
    let task = FixedDurationTask::new(command.name(), ctx.task_timing(), signals);
    submit(ctx, &command_id, task)
}
