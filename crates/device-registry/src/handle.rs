use crate::{CallError, CallEvery, CommandChannel, DeviceMetrics, HandlerId, MessageHandlers};
use link_transport::{
    AckCode, Command, DeviceId, Endpoint, Frame, Payload, PayloadKind, Result as TransportResult,
    VehicleKind,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tracing::trace;

/// Timing settings a handle needs from its session.
#[derive(Debug, Clone, Copy)]
pub struct DeviceSettings {
    pub command_timeout: Duration,
    pub command_retries: u32,
    pub command_progress_timeout: Duration,
    pub liveness_timeout: Duration,
}

struct Liveness {
    at: Instant,
    wall: OffsetDateTime,
    vehicle: VehicleKind,
}

struct DeviceInner {
    id: DeviceId,
    link: Arc<dyn Endpoint>,
    liveness: Mutex<Liveness>,
    handlers: MessageHandlers,
    commands: CommandChannel,
    timers: Arc<CallEvery>,
    settings: DeviceSettings,
}

/// The caller-visible binding to one discovered device.
///
/// Cloning is cheap and every clone refers to the same device; plugins keep a clone
/// for as long as they are attached.
#[derive(Clone)]
pub struct DeviceHandle {
    inner: Arc<DeviceInner>,
}

impl DeviceHandle {
    pub(crate) fn new(
        id: DeviceId,
        vehicle: VehicleKind,
        link: Arc<dyn Endpoint>,
        timers: Arc<CallEvery>,
        settings: DeviceSettings,
        metrics: Option<DeviceMetrics>,
    ) -> Self {
        let commands = CommandChannel::new(
            id,
            Arc::clone(&link),
            settings.command_timeout,
            settings.command_retries,
            settings.command_progress_timeout,
            metrics,
        );
        Self {
            inner: Arc::new(DeviceInner {
                id,
                link,
                liveness: Mutex::new(Liveness {
                    at: Instant::now(),
                    wall: OffsetDateTime::now_utc(),
                    vehicle,
                }),
                handlers: MessageHandlers::default(),
                commands,
                timers,
                settings,
            }),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.inner.id
    }

    pub fn vehicle(&self) -> VehicleKind {
        self.inner.liveness.lock().vehicle
    }

    pub fn link_name(&self) -> &str {
        self.inner.link.name()
    }

    pub fn settings(&self) -> DeviceSettings {
        self.inner.settings
    }

    /// Wall-clock time of the most recent liveness signal.
    pub fn last_liveness(&self) -> OffsetDateTime {
        self.inner.liveness.lock().wall
    }

    pub fn since_last_liveness(&self) -> Duration {
        self.inner.liveness.lock().at.elapsed()
    }

    pub fn is_stale(&self) -> bool {
        self.since_last_liveness() > self.inner.settings.liveness_timeout
    }

    pub(crate) fn touch(&self, vehicle: VehicleKind) {
        let mut liveness = self.inner.liveness.lock();
        liveness.at = Instant::now();
        liveness.wall = OffsetDateTime::now_utc();
        if vehicle != VehicleKind::Unknown {
            liveness.vehicle = vehicle;
        }
    }

    /// Fire-and-forget send of a payload addressed to this device.
    pub fn send(&self, payload: Payload) -> TransportResult<()> {
        self.inner.link.send(&Frame::new(self.inner.id, payload))
    }

    /// Issue a command and wait for its terminal acknowledgement.
    ///
    /// Fails with [`CallError::NoDevice`] without sending when the device has gone quiet.
    pub fn call(&self, command: Command) -> Result<AckCode, CallError> {
        if self.is_stale() {
            return Err(CallError::NoDevice(self.inner.id));
        }
        self.inner.commands.call(command)
    }

    pub fn register_handler<F>(&self, kind: PayloadKind, handler: F) -> HandlerId
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.inner.handlers.register(kind, handler)
    }

    pub fn unregister_handler(&self, id: HandlerId) -> bool {
        self.inner.handlers.unregister(id)
    }

    /// Scheduler shared by every device of the session.
    pub fn timers(&self) -> &Arc<CallEvery> {
        &self.inner.timers
    }

    /// Route one inbound payload (called on the delivery thread).
    pub(crate) fn deliver(&self, payload: &Payload) {
        match payload {
            Payload::CommandAck { token, code } => {
                self.inner.commands.resolve(*token, *code);
            }
            other => {
                if self.inner.handlers.dispatch(other) == 0 {
                    trace!(device = %self.inner.id, kind = ?other.kind(), "no handler");
                }
            }
        }
    }

    pub fn same_device(&self, other: &DeviceHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("id", &self.inner.id)
            .field("link", &self.inner.link.name())
            .field("vehicle", &self.vehicle())
            .finish()
    }
}
