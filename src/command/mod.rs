//! Command execution infrastructure for the simulated devices
//!
//! This module handles:
//! - Parsing and validating command invocations
//! - Checking legality against the observation and power state
//! - Registering commands with the tracker and handing them to workers

mod executor;
pub mod handlers;

pub use executor::{CommandExecutor, CommandResponse};
