use crate::{
    CallEvery, DeviceHandle, DeviceMetrics, DeviceRegistry, DeviceSettings, MetricsHub,
    RegistryError, Result, SessionConfig,
};
use link_transport::{DeviceId, Endpoint, Payload, TransportError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One discovery session: the registry, its timer thread and a delivery thread per
/// endpoint. Dropping the session stops and joins every thread it started.
pub struct Session {
    config: SessionConfig,
    registry: Arc<DeviceRegistry>,
    timers: Arc<CallEvery>,
    shutdown: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    metrics: Option<MetricsHub>,
}

impl Session {
    pub fn new(config: SessionConfig) -> Result<Self> {
        if config.command_timeout_ms == 0 || config.command_progress_timeout_ms == 0 {
            return Err(RegistryError::Config(
                "command_timeout_ms and command_progress_timeout_ms must be positive".into(),
            ));
        }
        if config.liveness_timeout_ms == 0 || config.liveness_check_ms == 0 {
            return Err(RegistryError::Config(
                "liveness_timeout_ms and liveness_check_ms must be positive".into(),
            ));
        }
        let metrics = MetricsHub::new().map_err(RegistryError::Config)?;
        let timers = Arc::new(CallEvery::new());
        let settings = DeviceSettings {
            command_timeout: config.command_timeout(),
            command_retries: config.command_retries,
            command_progress_timeout: config.command_progress_timeout(),
            liveness_timeout: config.liveness_timeout(),
        };
        let registry = Arc::new(DeviceRegistry::new(
            Arc::clone(&timers),
            settings,
            Some(metrics.dev.clone()),
        ));

        let weak = Arc::downgrade(&registry);
        timers.add(
            move || {
                if let Some(registry) = weak.upgrade() {
                    registry.check_liveness();
                }
            },
            config.liveness_check(),
        );

        let session = Self {
            config,
            registry,
            timers,
            shutdown: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
            metrics: Some(metrics),
        };
        session.spawn_timer_thread()?;
        debug!(config = ?session.config, "session started");
        Ok(session)
    }

    fn spawn_timer_thread(&self) -> Result<()> {
        let timers = Arc::clone(&self.timers);
        let shutdown = Arc::clone(&self.shutdown);
        let tick = self.config.timer_tick();
        let handle = thread::Builder::new()
            .name("session-timers".into())
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    timers.run_once();
                    thread::sleep(tick);
                }
            })
            .map_err(|e| RegistryError::Spawn(format!("timer: {e}")))?;
        self.workers.lock().push(handle);
        Ok(())
    }

    /// Open a transport from a spec such as `udp://:14540` and start delivering from it.
    pub fn add_connection(&self, spec: &str) -> Result<()> {
        let link = link_transport::open(spec)?;
        info!(connection = spec, "connection added");
        self.add_endpoint(link)
    }

    /// Start a delivery thread for an already opened endpoint.
    pub fn add_endpoint(&self, link: Arc<dyn Endpoint>) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let shutdown = Arc::clone(&self.shutdown);
        let metrics = self.metrics.as_ref().map(|m| m.dev.clone());
        let poll = self.config.recv_poll();
        let name = format!("deliver-{}", link.name());
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || deliver_loop(&link, &registry, &shutdown, metrics.as_ref(), poll))
            .map_err(|e| RegistryError::Spawn(format!("{name}: {e}")))?;
        self.workers.lock().push(handle);
        Ok(())
    }

    pub fn register_on_discover<F>(&self, callback: F)
    where
        F: Fn(DeviceId) + Send + Sync + 'static,
    {
        self.registry.register_discovery_subscriber(callback);
    }

    pub fn register_on_timeout<F>(&self, callback: F)
    where
        F: Fn(DeviceId) + Send + Sync + 'static,
    {
        self.registry.register_timeout_subscriber(callback);
    }

    pub fn device(&self, id: Option<DeviceId>) -> Result<DeviceHandle> {
        self.registry.get_device(id)
    }

    pub fn wait_for_device(&self, timeout: Duration) -> Result<DeviceHandle> {
        self.registry.wait_for_device(timeout)
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn metrics(&self) -> Option<&MetricsHub> {
        self.metrics.as_ref()
    }
}

fn deliver_loop(
    link: &Arc<dyn Endpoint>,
    registry: &DeviceRegistry,
    shutdown: &AtomicBool,
    metrics: Option<&DeviceMetrics>,
    poll: Duration,
) {
    debug!(link = link.name(), "delivery started");
    while !shutdown.load(Ordering::Relaxed) {
        let frame = match link.recv(poll) {
            Ok(frame) => frame,
            Err(TransportError::Timeout) => continue,
            Err(TransportError::Closed) => {
                info!(link = link.name(), "endpoint closed");
                break;
            }
            Err(e) => {
                warn!(link = link.name(), error = %e, "receive failed");
                continue;
            }
        };
        if let Some(m) = metrics {
            m.frames_received.inc();
        }
        match &frame.payload {
            Payload::Heartbeat { vehicle } => {
                registry.on_liveness_signal(frame.device, *vehicle, link);
            }
            payload => match registry.find(frame.device) {
                Some(handle) => handle.deliver(payload),
                None => debug!(device = %frame.device, kind = ?payload.kind(), "frame from undiscovered device"),
            },
        }
    }
    debug!(link = link.name(), "delivery stopped");
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let current = thread::current().id();
        for handle in self.workers.lock().drain(..) {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("session worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use link_transport::{AckCode, Command, MockLink, SampleKind, TelemetrySample, VehicleKind};
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn fast_config() -> SessionConfig {
        SessionConfig {
            command_timeout_ms: 200,
            command_retries: 0,
            liveness_timeout_ms: 100,
            liveness_check_ms: 20,
            ..SessionConfig::default()
        }
    }

    fn heartbeat() -> Payload {
        Payload::Heartbeat {
            vehicle: VehicleKind::Multicopter,
        }
    }

    #[test]
    fn rejects_zero_timeouts() {
        for config in [
            SessionConfig {
                liveness_timeout_ms: 0,
                ..SessionConfig::default()
            },
            SessionConfig {
                command_progress_timeout_ms: 0,
                ..SessionConfig::default()
            },
        ] {
            assert!(matches!(Session::new(config), Err(RegistryError::Config(_))));
        }
    }

    #[test]
    fn discovers_device_from_heartbeat() -> anyhow::Result<()> {
        let session = Session::new(fast_config())?;
        let (link, device) = MockLink::pair("session");
        let discovered = Arc::new(Mutex::new(Vec::new()));
        let d = Arc::clone(&discovered);
        session.register_on_discover(move |id| d.lock().push(id));
        session.add_endpoint(Arc::new(link))?;

        device.emit(DeviceId(42), heartbeat())?;
        let handle = session.wait_for_device(Duration::from_secs(2))?;
        assert_eq!(handle.id(), DeviceId(42));
        assert_eq!(session.device(None)?.id(), DeviceId(42));

        device.emit(DeviceId(42), heartbeat())?;
        thread::sleep(Duration::from_millis(50));
        assert_eq!(*discovered.lock(), vec![DeviceId(42)]);

        let text = session.metrics().map(MetricsHub::encode_text).unwrap_or_default();
        assert!(text.contains("fl_devices_discovered 1"));
        Ok(())
    }

    #[test]
    fn telemetry_flows_while_a_command_is_pending() -> anyhow::Result<()> {
        let session = Session::new(fast_config())?;
        let (link, device) = MockLink::pair("busy");
        session.add_endpoint(Arc::new(link))?;
        device.emit(DeviceId(1), heartbeat())?;
        let handle = session.wait_for_device(Duration::from_secs(2))?;

        let samples = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&samples);
        handle.register_handler(
            link_transport::PayloadKind::Sample(SampleKind::Armed),
            move |_| {
                s.fetch_add(1, Ordering::SeqCst);
            },
        );

        let responder = thread::spawn(move || -> anyhow::Result<()> {
            let frame = device.recv(Duration::from_secs(1))?;
            let token = match frame.payload {
                Payload::Command { token, .. } => token,
                other => anyhow::bail!("unexpected {other:?}"),
            };
            for _ in 0..3 {
                device.emit(
                    DeviceId(1),
                    Payload::Sample(TelemetrySample::Armed { armed: false }),
                )?;
            }
            thread::sleep(Duration::from_millis(50));
            device.emit(DeviceId(1), Payload::CommandAck { token, code: AckCode::Accepted })?;
            Ok(())
        });

        assert_eq!(handle.call(Command::Arm), Ok(AckCode::Accepted));
        assert_eq!(samples.load(Ordering::SeqCst), 3);
        responder.join().map_err(|_| anyhow::anyhow!("responder panicked"))??;
        Ok(())
    }

    #[test]
    fn quiet_device_times_out_and_refuses_commands() -> anyhow::Result<()> {
        let session = Session::new(fast_config())?;
        let (link, device) = MockLink::pair("quiet");
        let timeouts = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&timeouts);
        session.register_on_timeout(move |_| {
            t.fetch_add(1, Ordering::SeqCst);
        });
        session.add_endpoint(Arc::new(link))?;
        device.emit(DeviceId(7), heartbeat())?;
        let handle = session.wait_for_device(Duration::from_secs(2))?;

        let deadline = Instant::now() + Duration::from_secs(2);
        while timeouts.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(timeouts.load(Ordering::SeqCst), 1);
        assert_eq!(handle.call(Command::Arm), Err(crate::CallError::NoDevice(DeviceId(7))));
        assert!(device.try_recv().is_none(), "nothing sent to a quiet device");
        Ok(())
    }

    #[test]
    fn waiting_without_devices_reports_no_device() -> anyhow::Result<()> {
        let session = Session::new(fast_config())?;
        assert_eq!(
            session.wait_for_device(Duration::from_millis(20)).err(),
            Some(RegistryError::NoDevice(Duration::from_millis(20)))
        );
        Ok(())
    }
}
