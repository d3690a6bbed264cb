use crate::lifecycle::{HookError, Plugin, PluginImpl, PluginState};
use crate::{CommandResult, Result};
use device_registry::{DeviceHandle, HandlerId};
use link_transport::{
    Battery, Command, Health, Payload, PayloadKind, Position, SampleKind, TelemetrySample,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

type Observer = Arc<dyn Fn(&TelemetrySample) + Send + Sync>;

#[derive(Default)]
struct Latest {
    position: Option<Position>,
    health: Option<Health>,
    armed: Option<bool>,
    in_air: Option<bool>,
    battery: Option<Battery>,
}

#[derive(Default)]
struct Shared {
    latest: Mutex<Latest>,
    observers: Mutex<HashMap<SampleKind, Observer>>,
    live: AtomicBool,
}

impl Shared {
    fn on_sample(&self, sample: &TelemetrySample) {
        {
            let mut latest = self.latest.lock();
            match sample {
                TelemetrySample::Position(p) => latest.position = Some(*p),
                TelemetrySample::Health(h) => latest.health = Some(*h),
                TelemetrySample::Armed { armed } => latest.armed = Some(*armed),
                TelemetrySample::InAir { in_air } => latest.in_air = Some(*in_air),
                TelemetrySample::Battery(b) => latest.battery = Some(*b),
            }
        }
        let observer = self.observers.lock().get(&sample.kind()).cloned();
        // A sample whose observer was already being invoked when disable began may
        // still finish; none starts once `live` is cleared.
        if let Some(observer) = observer {
            if self.live.load(Ordering::Acquire) {
                observer(sample);
            }
        }
    }
}

pub(crate) struct TelemetryImpl {
    device: DeviceHandle,
    shared: Arc<Shared>,
    handlers: Vec<HandlerId>,
}

impl PluginImpl for TelemetryImpl {
    const NAME: &'static str = "telemetry";

    fn new(device: DeviceHandle) -> Self {
        Self {
            device,
            shared: Arc::new(Shared::default()),
            handlers: Vec::new(),
        }
    }

    fn enable(&mut self) -> std::result::Result<(), HookError> {
        self.shared.live.store(true, Ordering::Release);
        for kind in SampleKind::ALL {
            let shared = Arc::clone(&self.shared);
            let id = self
                .device
                .register_handler(PayloadKind::Sample(kind), move |payload| {
                    if let Payload::Sample(sample) = payload {
                        shared.on_sample(sample);
                    }
                });
            self.handlers.push(id);
        }
        Ok(())
    }

    fn disable(&mut self) -> std::result::Result<(), HookError> {
        self.shared.live.store(false, Ordering::Release);
        for id in self.handlers.drain(..) {
            self.device.unregister_handler(id);
        }
        self.shared.observers.lock().clear();
        Ok(())
    }
}

impl TelemetryImpl {
    fn set_rate(&self, kind: SampleKind, hertz: f64) -> CommandResult {
        if !hertz.is_finite() || hertz < 0.0 {
            return CommandResult::InvalidArgument;
        }
        let result = CommandResult::from(
            self.device
                .call(Command::SetMessageRate { kind, hertz }),
        );
        debug!(device = %self.device.id(), ?kind, hertz, %result, "set rate");
        result
    }

    fn subscribe(&self, kind: SampleKind, observer: Observer) {
        self.shared.observers.lock().insert(kind, observer);
    }

    fn unsubscribe(&self, kind: SampleKind) {
        self.shared.observers.lock().remove(&kind);
    }
}

/// Periodic vehicle state pushed by the device.
///
/// At most one observer is registered per sample kind and the last registration wins.
/// Observers run on the session's delivery thread and must return quickly; they are
/// dropped when the plugin is disabled. The getters return the most recent sample, or
/// `None` before the first one arrived.
pub struct Telemetry {
    plugin: Plugin<TelemetryImpl>,
}

impl Telemetry {
    pub fn new(device: &DeviceHandle) -> Result<Self> {
        Ok(Self {
            plugin: Plugin::new(device)?,
        })
    }

    pub fn state(&self) -> PluginState {
        self.plugin.state()
    }

    pub fn shutdown(&self) {
        self.plugin.shutdown();
    }

    /// Ask the device to stream `kind` at `hertz`; zero stops the stream.
    pub fn set_rate(&self, kind: SampleKind, hertz: f64) -> Result<CommandResult> {
        self.plugin.with_enabled(|t| t.set_rate(kind, hertz))
    }

    pub fn set_rate_position(&self, hertz: f64) -> Result<CommandResult> {
        self.set_rate(SampleKind::Position, hertz)
    }

    pub fn set_rate_health(&self, hertz: f64) -> Result<CommandResult> {
        self.set_rate(SampleKind::Health, hertz)
    }

    pub fn set_rate_armed(&self, hertz: f64) -> Result<CommandResult> {
        self.set_rate(SampleKind::Armed, hertz)
    }

    pub fn set_rate_in_air(&self, hertz: f64) -> Result<CommandResult> {
        self.set_rate(SampleKind::InAir, hertz)
    }

    pub fn set_rate_battery(&self, hertz: f64) -> Result<CommandResult> {
        self.set_rate(SampleKind::Battery, hertz)
    }

    pub fn subscribe<F>(&self, kind: SampleKind, observer: F) -> Result<()>
    where
        F: Fn(&TelemetrySample) + Send + Sync + 'static,
    {
        self.plugin
            .with_enabled(|t| t.subscribe(kind, Arc::new(observer)))
    }

    pub fn unsubscribe(&self, kind: SampleKind) -> Result<()> {
        self.plugin.with_enabled(|t| t.unsubscribe(kind))
    }

    pub fn position_async<F>(&self, observer: F) -> Result<()>
    where
        F: Fn(Position) + Send + Sync + 'static,
    {
        self.subscribe(SampleKind::Position, move |sample| {
            if let TelemetrySample::Position(p) = sample {
                observer(*p);
            }
        })
    }

    pub fn health_async<F>(&self, observer: F) -> Result<()>
    where
        F: Fn(Health) + Send + Sync + 'static,
    {
        self.subscribe(SampleKind::Health, move |sample| {
            if let TelemetrySample::Health(h) = sample {
                observer(*h);
            }
        })
    }

    pub fn armed_async<F>(&self, observer: F) -> Result<()>
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.subscribe(SampleKind::Armed, move |sample| {
            if let TelemetrySample::Armed { armed } = sample {
                observer(*armed);
            }
        })
    }

    pub fn in_air_async<F>(&self, observer: F) -> Result<()>
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.subscribe(SampleKind::InAir, move |sample| {
            if let TelemetrySample::InAir { in_air } = sample {
                observer(*in_air);
            }
        })
    }

    pub fn battery_async<F>(&self, observer: F) -> Result<()>
    where
        F: Fn(Battery) + Send + Sync + 'static,
    {
        self.subscribe(SampleKind::Battery, move |sample| {
            if let TelemetrySample::Battery(b) = sample {
                observer(*b);
            }
        })
    }

    pub fn position(&self) -> Result<Option<Position>> {
        self.plugin.with_enabled(|t| t.shared.latest.lock().position)
    }

    pub fn health(&self) -> Result<Option<Health>> {
        self.plugin.with_enabled(|t| t.shared.latest.lock().health)
    }

    /// Aggregate flag of the latest health sample; `false` until one has arrived.
    pub fn health_all_ok(&self) -> Result<bool> {
        self.plugin.with_enabled(|t| {
            t.shared
                .latest
                .lock()
                .health
                .is_some_and(|h| h.all_ok())
        })
    }

    pub fn armed(&self) -> Result<bool> {
        self.plugin
            .with_enabled(|t| t.shared.latest.lock().armed.unwrap_or(false))
    }

    pub fn in_air(&self) -> Result<bool> {
        self.plugin
            .with_enabled(|t| t.shared.latest.lock().in_air.unwrap_or(false))
    }

    pub fn battery(&self) -> Result<Option<Battery>> {
        self.plugin.with_enabled(|t| t.shared.latest.lock().battery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{harness, harness_with_timeout};
    use crate::PluginError;
    use link_transport::AckCode;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    fn health(ok: bool) -> Payload {
        Payload::Sample(TelemetrySample::Health(Health {
            home_position_ok: ok,
            ..Health::all_good()
        }))
    }

    #[test]
    fn health_is_not_ready_until_a_sample_arrives() {
        let h = harness();
        let telemetry = Telemetry::new(&h.device).unwrap();
        assert!(!telemetry.health_all_ok().unwrap());
        assert_eq!(telemetry.health().unwrap(), None);

        h.emit(health(true));
        h.settle();
        assert!(telemetry.health_all_ok().unwrap());

        h.emit(health(false));
        h.settle();
        assert!(!telemetry.health_all_ok().unwrap());
    }

    #[test]
    fn last_observer_wins_and_samples_keep_order() {
        let h = harness();
        let telemetry = Telemetry::new(&h.device).unwrap();
        let first = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&first);
        telemetry
            .armed_async(move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        telemetry
            .position_async(move |p| s.lock().push(p.relative_altitude_m))
            .unwrap();
        let second = Arc::new(AtomicUsize::new(0));
        let s2 = Arc::clone(&second);
        telemetry
            .armed_async(move |_| {
                s2.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        h.emit(Payload::Sample(TelemetrySample::Armed { armed: true }));
        for alt in [1.0, 2.0, 3.0] {
            h.emit(Payload::Sample(TelemetrySample::Position(Position {
                relative_altitude_m: alt,
                ..Position::default()
            })));
        }
        h.settle();

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock(), vec![1.0, 2.0, 3.0]);
        assert!(telemetry.armed().unwrap());
        assert_eq!(
            telemetry.position().unwrap().map(|p| p.relative_altitude_m),
            Some(3.0)
        );
    }

    #[test]
    fn invalid_rates_never_reach_the_device() {
        let h = harness();
        let telemetry = Telemetry::new(&h.device).unwrap();
        for bad in [-1.0, f64::NAN, f64::INFINITY] {
            assert_eq!(
                telemetry.set_rate_position(bad).unwrap(),
                CommandResult::InvalidArgument
            );
        }
        assert!(h.remote.try_recv().is_none());
    }

    #[test]
    fn rate_results_follow_the_acknowledgement() {
        let h = harness();
        let telemetry = Telemetry::new(&h.device).unwrap();

        let responder = h.answer_next(AckCode::Accepted);
        assert_eq!(telemetry.set_rate_battery(2.0).unwrap(), CommandResult::Success);
        assert_eq!(
            responder.join().unwrap(),
            Command::SetMessageRate {
                kind: SampleKind::Battery,
                hertz: 2.0
            }
        );

        let responder = h.answer_next(AckCode::Denied);
        assert_eq!(
            telemetry.set_rate_position(500.0).unwrap(),
            CommandResult::CommandDenied
        );
        responder.join().unwrap();

        // Nobody answers this one.
        assert_eq!(telemetry.set_rate_health(1.0).unwrap(), CommandResult::Timeout);
    }

    #[test]
    fn disabled_telemetry_stops_delivery_and_fails_fast() {
        let h = harness();
        let telemetry = Telemetry::new(&h.device).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&hits);
        telemetry
            .in_air_async(move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        telemetry.shutdown();
        h.emit(Payload::Sample(TelemetrySample::InAir { in_air: true }));
        h.settle();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(matches!(
            telemetry.in_air(),
            Err(PluginError::NotEnabled { plugin: "telemetry", .. })
        ));
        assert!(telemetry.set_rate_in_air(1.0).is_err());
    }

    #[test]
    fn every_operation_fails_fast_after_shutdown() {
        let h = harness();
        let telemetry = Telemetry::new(&h.device).unwrap();
        telemetry.shutdown();

        let rates: [fn(&Telemetry, f64) -> Result<CommandResult>; 5] = [
            Telemetry::set_rate_position,
            Telemetry::set_rate_health,
            Telemetry::set_rate_armed,
            Telemetry::set_rate_in_air,
            Telemetry::set_rate_battery,
        ];
        for set in rates {
            assert!(matches!(
                set(&telemetry, 1.0),
                Err(PluginError::NotEnabled { plugin: "telemetry", .. })
            ));
        }
        for kind in SampleKind::ALL {
            assert!(telemetry.set_rate(kind, 1.0).is_err());
            assert!(telemetry.subscribe(kind, |_| {}).is_err());
            assert!(telemetry.unsubscribe(kind).is_err());
        }
        assert!(telemetry.position_async(|_| {}).is_err());
        assert!(telemetry.health_async(|_| {}).is_err());
        assert!(telemetry.armed_async(|_| {}).is_err());
        assert!(telemetry.in_air_async(|_| {}).is_err());
        assert!(telemetry.battery_async(|_| {}).is_err());
        assert!(telemetry.position().is_err());
        assert!(telemetry.health().is_err());
        assert!(telemetry.health_all_ok().is_err());
        assert!(telemetry.armed().is_err());
        assert!(telemetry.in_air().is_err());
        assert!(telemetry.battery().is_err());
        assert!(h.remote.try_recv().is_none());
    }

    #[test]
    fn acknowledged_rate_change_survives_a_concurrent_shutdown() {
        let h = harness_with_timeout(1_000);
        let telemetry = Arc::new(Telemetry::new(&h.device).unwrap());

        // The observer reads back through the plugin on the delivery thread.
        let lookup_failed = Arc::new(Mutex::new(None));
        let weak = Arc::downgrade(&telemetry);
        let seen = Arc::clone(&lookup_failed);
        telemetry
            .position_async(move |_| {
                if let Some(t) = weak.upgrade() {
                    *seen.lock() = Some(t.position().is_err());
                }
            })
            .unwrap();

        let t = Arc::clone(&telemetry);
        let issuer = thread::spawn(move || t.set_rate_health(1.0));
        let frame = h.remote.recv(Duration::from_secs(1)).unwrap();
        let token = match frame.payload {
            Payload::Command { token, .. } => Some(token),
            _ => None,
        }
        .unwrap();

        let t = Arc::clone(&telemetry);
        let closer = thread::spawn(move || t.shutdown());
        thread::sleep(Duration::from_millis(50));
        assert_eq!(telemetry.state(), PluginState::Disabled);

        h.emit(Payload::Sample(TelemetrySample::Position(Position::default())));
        h.settle();
        assert_eq!(*lookup_failed.lock(), Some(true));

        h.emit(Payload::CommandAck {
            token,
            code: AckCode::Accepted,
        });
        assert_eq!(issuer.join().unwrap().unwrap(), CommandResult::Success);
        closer.join().unwrap();
        assert_eq!(telemetry.state(), PluginState::Deinitialized);
    }

    #[test]
    fn observers_are_skipped_once_delivery_is_closed() {
        let shared = Shared::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&hits);
        shared.observers.lock().insert(
            SampleKind::Armed,
            Arc::new(move |_: &TelemetrySample| {
                c.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let sample = TelemetrySample::Armed { armed: true };

        shared.live.store(true, Ordering::Release);
        shared.on_sample(&sample);
        shared.live.store(false, Ordering::Release);
        shared.on_sample(&sample);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(shared.latest.lock().armed, Some(true));
    }
}
