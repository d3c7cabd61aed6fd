//! Command-line client for hangar: pull and push workspace state, and
//! create, wait for and cancel builds.

pub mod cli;
pub mod client;
pub mod commands;

pub use cli::Args;
pub use client::{failure_code, ApiFailure, HangarClient};
pub use commands::execute_command;
