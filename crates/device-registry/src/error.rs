use link_transport::{DeviceId, TransportError};
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = RegistryError> = core::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown device: {0}")]
    UnknownDevice(DeviceId),
    #[error("{0} devices discovered; an identifier is required")]
    AmbiguousDevice(usize),
    #[error("no device discovered (waited {0:?})")]
    NoDevice(Duration),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to spawn {0} thread")]
    Spawn(String),
    #[error("invalid session config: {0}")]
    Config(String),
}

/// Why a correlated command produced no terminal acknowledgement.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("no acknowledgement after {attempts} attempt(s)")]
    Timeout { attempts: u32 },
    #[error("device {0} is not sending liveness signals")]
    NoDevice(DeviceId),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
