//! Command executor - validates and dispatches command invocations

use std::sync::Arc;

use cspsim_shared::{CommandError, CommandId, CompletionPolicy, DeviceCommand, ResultCode};
use serde_json::Value;
use tracing::{info, warn};

use super::handlers;
use crate::device::DeviceContext;

/// Immediate answer to an invocation.
///
/// For accepted commands the message is the command id.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    pub code: ResultCode,
    pub message: String,
}

impl CommandResponse {
    pub fn queued(command_id: &CommandId) -> Self {
        Self {
            code: ResultCode::Queued,
            message: command_id.to_string(),
        }
    }

    pub fn started(command_id: &CommandId) -> Self {
        Self {
            code: ResultCode::Started,
            message: command_id.to_string(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            code: ResultCode::Rejected,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            code: ResultCode::Failed,
            message: message.into(),
        }
    }

    /// Tracking handle of an accepted command
    pub fn command_id(&self) -> Option<CommandId> {
        matches!(self.code, ResultCode::Queued | ResultCode::Started)
            .then(|| CommandId::from(self.message.as_str()))
    }
}

/// Runs command invocations against one device
pub struct CommandExecutor {
    ctx: Arc<DeviceContext>,
}

impl CommandExecutor {
    pub fn new(ctx: Arc<DeviceContext>) -> Self {
        Self { ctx }
    }

    /// Validate and start a command.
    ///
    /// Errors are returned before any record is created; once a record
    /// exists the outcome is only visible through the tracker.
    pub fn invoke(
        &self,
        command_name: &str,
        payload: Option<&str>,
    ) -> Result<CommandResponse, CommandError> {
        let ctx = &self.ctx;
        let command: DeviceCommand = command_name.parse()?;

        if !ctx.profile.supports(command) {
            return Err(CommandError::NotSupported {
                command: command.name().to_string(),
                device: ctx.name.clone(),
            });
        }

        if let Err(e) = ctx
            .legality
            .check(command, ctx.obs.state(), ctx.attributes.power())
        {
            warn!("[{}] {}", ctx.name, e);
            return Err(e);
        }

        if ctx.raise_exception.is_set() {
            warn!("[{}] Raising simulated exception for {}", ctx.name, command);
            return Err(CommandError::InjectedFailure {
                command: command.name().to_string(),
            });
        }

        let payload = parse_payload(command, payload)?;

        if command != DeviceCommand::EndScan {
            ctx.signals.end.clear();
        }

        info!("[{}] Executing {}", ctx.name, command);
        let response = self.dispatch(command, payload.as_ref());
        info!(
            "[{}] {} -> {} {}",
            ctx.name, command, response.code, response.message
        );
        Ok(response)
    }

    fn dispatch(&self, command: DeviceCommand, payload: Option<&Value>) -> CommandResponse {
        use DeviceCommand::*;

        let ctx = &self.ctx;
        let Some(policy) = CompletionPolicy::for_command(command) else {
            return match command {
                InitSysParam => handlers::handle_init_sys_param(ctx, payload),
                _ => handlers::handle_power(ctx, command),
            };
        };

        match command {
            Abort => handlers::handle_abort(ctx, policy),
            EndScan => handlers::handle_end_scan(ctx, policy),
            Restart => handlers::handle_restart(ctx, policy),
            ObsReset => handlers::handle_obs_reset(ctx, policy),
            AssignResources | AddReceptors | ReleaseAllResources | RemoveAllReceptors => {
                handlers::handle_resources(ctx, command, policy, payload)
            }
            _ => handlers::handle_observation(ctx, command, policy, payload),
        }
    }
}

fn parse_payload(
    command: DeviceCommand,
    payload: Option<&str>,
) -> Result<Option<Value>, CommandError> {
    let invalid = |reason: String| CommandError::InvalidPayload {
        command: command.name().to_string(),
        reason,
    };

    match (command.takes_payload(), payload) {
        (true, Some(text)) => serde_json::from_str(text)
            .map(Some)
            .map_err(|e| invalid(e.to_string())),
        (true, None) => Err(invalid("missing JSON argument".into())),
        (false, Some(_)) => Err(invalid("command takes no argument".into())),
        (false, None) => Ok(None),
    }
}
