use crate::{CallError, DeviceMetrics};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use link_transport::{AckCode, Command, DeviceId, Endpoint, Frame, Payload, TransportError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Request/response correlation for one device.
///
/// Each command gets a fresh token and a waiter slot; the delivery thread resolves the
/// slot through [`resolve`](Self::resolve) when the matching acknowledgement arrives.
/// At most one command is outstanding per device: callers queue on an in-flight gate
/// and are served one at a time, in the order they acquire it.
pub struct CommandChannel {
    device: DeviceId,
    link: Arc<dyn Endpoint>,
    waiters: Mutex<HashMap<u64, Sender<AckCode>>>,
    in_flight: Mutex<()>,
    next_token: AtomicU64,
    timeout: Duration,
    retries: u32,
    progress_timeout: Duration,
    metrics: Option<DeviceMetrics>,
}

impl CommandChannel {
    pub fn new(
        device: DeviceId,
        link: Arc<dyn Endpoint>,
        timeout: Duration,
        retries: u32,
        progress_timeout: Duration,
        metrics: Option<DeviceMetrics>,
    ) -> Self {
        Self {
            device,
            link,
            waiters: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(()),
            next_token: AtomicU64::new(1),
            timeout,
            retries,
            progress_timeout,
            metrics,
        }
    }

    /// Send `command` and block until a terminal acknowledgement or the final timeout.
    ///
    /// An unanswered attempt is resent with the same token up to `retries` times;
    /// [`AckCode::InProgress`] restarts the wait without resending. The whole call never
    /// outlasts `progress_timeout`, however often the device reports progress.
    pub fn call(&self, command: Command) -> Result<AckCode, CallError> {
        let _in_flight = self.in_flight.lock();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = channel::unbounded();
        self.waiters.lock().insert(token, tx);
        let name = command.name();
        let frame = Frame::new(self.device, Payload::Command { token, command });
        let outcome = self.exchange(token, &frame, &rx);
        self.waiters.lock().remove(&token);

        match &outcome {
            Ok(code) => debug!(device = %self.device, token, command = name, ?code, "command acknowledged"),
            Err(e) => warn!(device = %self.device, token, command = name, error = %e, "command failed"),
        }
        outcome
    }

    fn exchange(
        &self,
        token: u64,
        frame: &Frame,
        rx: &Receiver<AckCode>,
    ) -> Result<AckCode, CallError> {
        let attempts = self.retries.saturating_add(1);
        let give_up = Instant::now() + self.progress_timeout;
        for attempt in 1..=attempts {
            self.link.send(frame)?;
            if let Some(m) = &self.metrics {
                m.commands_sent.inc();
            }
            let mut deadline = (Instant::now() + self.timeout).min(give_up);
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(remaining) {
                    Ok(code) if code.is_terminal() => return Ok(code),
                    Ok(_) => {
                        deadline = (Instant::now() + self.timeout).min(give_up);
                    }
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(CallError::Transport(TransportError::Closed))
                    }
                }
            }
            if Instant::now() >= give_up {
                warn!(device = %self.device, token, attempt, limit = ?self.progress_timeout, "command still unfinished, giving up");
                return Err(self.timed_out(attempt));
            }
            if attempt < attempts {
                debug!(device = %self.device, token, attempt, "no acknowledgement, resending");
            }
        }
        Err(self.timed_out(attempts))
    }

    fn timed_out(&self, attempts: u32) -> CallError {
        if let Some(m) = &self.metrics {
            m.command_timeouts.inc();
        }
        CallError::Timeout { attempts }
    }

    /// Hand an acknowledgement to its waiter. Returns `false` for unknown or stale tokens.
    pub fn resolve(&self, token: u64, code: AckCode) -> bool {
        match self.waiters.lock().get(&token) {
            Some(waiter) => waiter.send(code).is_ok(),
            None => {
                debug!(device = %self.device, token, ?code, "acknowledgement without waiter");
                false
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.waiters.lock().len()
    }
}
