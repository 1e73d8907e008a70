//! CLI module for the promotion engine
//!
//! - init: write a default configuration file
//! - serve: load configuration and run the HTTP API

mod args;
mod commands;
mod errors;

pub use args::{Cli, Command};
pub use commands::{build_service, init, run, run_command, serve};
pub use errors::{CliError, CliErrorCode, CliResult};
