use crate::{LifecycleStage, PluginState};
use device_registry::{CallError, RegistryError};
use link_transport::AckCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T, E = PluginError> = core::result::Result<T, E>;

/// Errors that are not command outcomes: lifecycle failures and misuse.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PluginError {
    #[error("{plugin} plugin is {state}; operations require it to be enabled")]
    NotEnabled {
        plugin: &'static str,
        state: PluginState,
    },
    #[error("{plugin} plugin failed to {stage}: {reason}")]
    Lifecycle {
        plugin: &'static str,
        stage: LifecycleStage,
        reason: String,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Terminal outcome of one command, returned to the issuer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandResult {
    Success,
    NoDevice,
    ConnectionError,
    Busy,
    CommandDenied,
    Timeout,
    Unsupported,
    InvalidArgument,
    Unknown,
}

impl CommandResult {
    pub fn is_success(self) -> bool {
        self == CommandResult::Success
    }

    pub fn description(self) -> &'static str {
        match self {
            CommandResult::Success => "Success",
            CommandResult::NoDevice => "No device",
            CommandResult::ConnectionError => "Connection error",
            CommandResult::Busy => "Busy",
            CommandResult::CommandDenied => "Command denied",
            CommandResult::Timeout => "Timeout",
            CommandResult::Unsupported => "Unsupported",
            CommandResult::InvalidArgument => "Invalid argument",
            CommandResult::Unknown => "Unknown error",
        }
    }
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl From<AckCode> for CommandResult {
    fn from(code: AckCode) -> Self {
        match code {
            AckCode::Accepted => CommandResult::Success,
            AckCode::TemporarilyRejected => CommandResult::Busy,
            AckCode::Denied => CommandResult::CommandDenied,
            AckCode::Unsupported => CommandResult::Unsupported,
            // InProgress never reaches the caller; the channel keeps waiting on it.
            AckCode::InProgress | AckCode::Failed => CommandResult::Unknown,
        }
    }
}

impl From<CallError> for CommandResult {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Timeout { .. } => CommandResult::Timeout,
            CallError::NoDevice(_) => CommandResult::NoDevice,
            CallError::Transport(_) => CommandResult::ConnectionError,
        }
    }
}

impl From<core::result::Result<AckCode, CallError>> for CommandResult {
    fn from(outcome: core::result::Result<AckCode, CallError>) -> Self {
        match outcome {
            Ok(code) => code.into(),
            Err(err) => err.into(),
        }
    }
}
