//! CLI-specific error types
//!
//! Every CLI error is fatal: `main` prints it and exits non-zero.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;

/// CLI error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliErrorCode {
    ConfigError,
    IoError,
    AlreadyInitialized,
    BootFailed,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "PROMOTER_CLI_CONFIG_ERROR",
            Self::IoError => "PROMOTER_CLI_IO_ERROR",
            Self::AlreadyInitialized => "PROMOTER_CLI_ALREADY_INITIALIZED",
            Self::BootFailed => "PROMOTER_CLI_BOOT_FAILED",
        }
    }
}

/// CLI error
#[derive(Debug, Error)]
#[error("{}: {}", .code.code(), .message)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn already_initialized(path: &std::path::Path) -> Self {
        Self::new(
            CliErrorCode::AlreadyInitialized,
            format!(
                "{} already exists. Pass --force to overwrite it.",
                path.display()
            ),
        )
    }

    pub fn boot_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::BootFailed, msg)
    }

    pub fn code(&self) -> CliErrorCode {
        self.code
    }

    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::config_error(e.to_string())
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;
