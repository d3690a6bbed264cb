use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid connection spec: {0}")]
    InvalidSpec(String),
    #[error("port already in use: {0}")]
    PortInUse(String),
    #[error("operation not supported on this backend: {0}")]
    Unsupported(&'static str),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("timeout")]
    Timeout,
    #[error("link closed")]
    Closed,
    #[error("no remote peer known yet")]
    NoPeer,
    #[error("codec error: {0}")]
    Codec(String),
}
