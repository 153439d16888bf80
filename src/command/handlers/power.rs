//! Power command handlers (On, Off, Standby)

use cspsim_shared::{
    CommandUpdate, CompletionHook, DeviceCommand, FixedDurationTask, PowerState, ResultCode,
    TaskResult, TaskStatus,
};
use tracing::warn;

use super::submit;
use crate::command::CommandResponse;
use crate::device::DeviceContext;

/// Handle On / Off / Standby
pub fn handle_power(ctx: &DeviceContext, command: DeviceCommand) -> CommandResponse {
    let target = match command {
        DeviceCommand::On => PowerState::On,
        DeviceCommand::Off => PowerState::Off,
        _ => PowerState::Standby,
    };

    if !ctx.profile.has_hardware {
        // Recorded, so the caller can still follow the rejection
        let command_id = ctx.tracker.new_command(command.name(), None);
        let message = format!("{} has no hardware: {} command rejected", ctx.name, command);
        warn!("{}", message);
        ctx.report(
            &command_id,
            CommandUpdate::finished(
                TaskStatus::Rejected,
                TaskResult::new(ResultCode::Rejected, message.clone()),
            ),
        );
        return CommandResponse::rejected(message);
    }

    let attributes = ctx.attributes.clone();
    let hook: CompletionHook = Box::new(move |result: Option<&TaskResult>| {
        if !result.is_some_and(TaskResult::is_failure) {
            attributes.set_power(target);
        }
        Ok(())
    });

    let command_id = ctx.tracker.new_command(command.name(), Some(hook));
    let signals = ctx.signals.for_command();
    let task = FixedDurationTask::new(command.name(), ctx.task_timing(), signals);
    submit(ctx, &command_id, task)
}
