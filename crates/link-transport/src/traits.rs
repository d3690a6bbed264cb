use crate::{Frame, Result};
use std::time::Duration;

/// A duplex channel to one or more devices.
///
/// Endpoints are shared between the delivery thread (receiving) and any number of
/// command issuers (sending), so both operations take `&self`. Implementations
/// serialize their own writes.
pub trait Endpoint: Send + Sync {
    /// Human-readable name, used in logs.
    fn name(&self) -> &str;

    /// Receive one frame, waiting at most `timeout`.
    ///
    /// Returns [`TransportError::Timeout`](crate::TransportError::Timeout) when nothing
    /// arrived and [`TransportError::Closed`](crate::TransportError::Closed) once the
    /// link can no longer deliver.
    fn recv(&self, timeout: Duration) -> Result<Frame>;

    /// Send one frame.
    fn send(&self, frame: &Frame) -> Result<()>;
}
