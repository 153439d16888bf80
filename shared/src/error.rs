//! Error types for command invocation, tracking and dispatch

use thiserror::Error;

use crate::command::CommandId;
use crate::state_machine::{ObsState, PowerState};

/// Errors that reject a command invocation before any record is created
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("{command} command not supported by {device}")]
    NotSupported { command: String, device: String },

    #[error("{command} command not permitted in observation state {obs_state} or state {power_state}")]
    NotAllowed {
        command: String,
        obs_state: ObsState,
        power_state: PowerState,
    },

    #[error("Invalid payload for {command}: {reason}")]
    InvalidPayload { command: String, reason: String },

    #[error("{command} command raised a simulated exception")]
    InjectedFailure { command: String },
}

/// Errors raised by the command tracker
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// Only the tracker hands out ids, so this is a programming error
    #[error("Command {0} is not tracked")]
    UnknownCommand(CommandId),
}

/// Errors raised while handing a task over to a worker
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("No async runtime available to run {0}")]
    NoRuntime(CommandId),
}
