//! Simulated vehicle driving the device half of a [`MockLink`](crate::MockLink).
//!
//! The simulator emits liveness signals, streams telemetry at the rates it is asked
//! for and acknowledges commands with the same rules a real autopilot applies
//! (arming requires good health, takeoff requires arming, transitions require a
//! VTOL airframe). It exists so binaries and tests can run the full stack without
//! hardware.

use crate::{
    AckCode, Battery, Command, DeviceId, Health, MockDevice, Payload, Position, Product,
    Result, SampleKind, TelemetrySample, TransportError, VehicleKind, Version, VersionInfo,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const TICK: Duration = Duration::from_millis(5);
const CLIMB_RATE_M_S: f32 = 2.5;
const HOME_LAT_DEG: f64 = 47.397_742;
const HOME_LON_DEG: f64 = 8.545_594;
const HOME_ALT_M: f32 = 488.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub heartbeat_period_ms: u64,
    pub vehicle: VehicleKind,
    pub healthy: bool,
    /// Highest sample rate the simulated autopilot accepts.
    pub max_rate_hz: f64,
    pub ack_delay_ms: u64,
    /// Swallow every command acknowledgement (exercises client timeouts).
    pub drop_acks: bool,
    pub mission_step_ms: u64,
    pub default_rates: BTreeMap<SampleKind, f64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        let mut default_rates = BTreeMap::new();
        default_rates.insert(SampleKind::Health, 1.0);
        default_rates.insert(SampleKind::Armed, 1.0);
        default_rates.insert(SampleKind::InAir, 1.0);
        Self {
            heartbeat_period_ms: 1000,
            vehicle: VehicleKind::Multicopter,
            healthy: true,
            max_rate_hz: 50.0,
            ack_delay_ms: 0,
            drop_acks: false,
            mission_step_ms: 1000,
            default_rates,
        }
    }
}

#[derive(Debug)]
struct Stream {
    interval: Duration,
    next_due: Instant,
}

#[derive(Debug, Default)]
struct Mission {
    total: u32,
    current: u32,
    running: bool,
    altitude_m: f32,
    next_step: Option<Instant>,
}

#[derive(Debug)]
struct SimState {
    healthy: bool,
    heartbeat: bool,
    busy: bool,
    armed: bool,
    in_air: bool,
    fixed_wing: bool,
    altitude_m: f32,
    target_altitude_m: f32,
    battery_percent: f32,
    streams: HashMap<SampleKind, Stream>,
    mission: Mission,
    received: Vec<Command>,
}

/// Handle to a running simulated vehicle. Stops its thread on drop.
pub struct SimVehicle {
    id: DeviceId,
    state: Arc<Mutex<SimState>>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimVehicle {
    pub fn spawn(device: MockDevice, id: DeviceId, config: SimConfig) -> Result<Self> {
        let now = Instant::now();
        let mut streams = HashMap::new();
        for (kind, hz) in &config.default_rates {
            if let Some(interval) = rate_interval(*hz) {
                streams.insert(
                    *kind,
                    Stream {
                        interval,
                        next_due: now + interval,
                    },
                );
            }
        }
        let state = Arc::new(Mutex::new(SimState {
            healthy: config.healthy,
            heartbeat: true,
            busy: false,
            armed: false,
            in_air: false,
            fixed_wing: false,
            altitude_m: 0.0,
            target_altitude_m: 0.0,
            battery_percent: 100.0,
            streams,
            mission: Mission::default(),
            received: Vec::new(),
        }));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            id,
            device,
            config,
            state: Arc::clone(&state),
            shutdown: Arc::clone(&shutdown),
            pending_acks: Vec::new(),
            next_heartbeat: now,
            last_tick: now,
        };
        let handle = thread::Builder::new()
            .name(format!("sim-vehicle-{id}"))
            .spawn(move || worker.run())
            .map_err(|e| TransportError::Io(e.to_string()))?;

        Ok(Self {
            id,
            state,
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.lock().healthy = healthy;
    }

    /// Stop or resume liveness signals (telemetry keeps flowing).
    pub fn set_heartbeat(&self, enabled: bool) {
        self.state.lock().heartbeat = enabled;
    }

    /// While busy, every command except rate changes is temporarily rejected.
    pub fn set_busy(&self, busy: bool) {
        self.state.lock().busy = busy;
    }

    pub fn armed(&self) -> bool {
        self.state.lock().armed
    }

    pub fn in_air(&self) -> bool {
        self.state.lock().in_air
    }

    pub fn relative_altitude_m(&self) -> f32 {
        self.state.lock().altitude_m
    }

    /// Every command received so far, in arrival order.
    pub fn received_commands(&self) -> Vec<Command> {
        self.state.lock().received.clone()
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(device = %self.id, "sim vehicle thread panicked");
            }
        }
    }
}

impl Drop for SimVehicle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn rate_interval(hz: f64) -> Option<Duration> {
    if hz.is_finite() && hz > 0.0 {
        Some(Duration::from_secs_f64(1.0 / hz))
    } else {
        None
    }
}

struct Worker {
    id: DeviceId,
    device: MockDevice,
    config: SimConfig,
    state: Arc<Mutex<SimState>>,
    shutdown: Arc<AtomicBool>,
    pending_acks: Vec<(Instant, u64, AckCode)>,
    next_heartbeat: Instant,
    last_tick: Instant,
}

impl Worker {
    fn run(mut self) {
        debug!(device = %self.id, "sim vehicle started");
        while !self.shutdown.load(Ordering::Relaxed) {
            if let Err(e) = self.step() {
                // The client side went away; nothing left to simulate.
                debug!(device = %self.id, error = %e, "sim vehicle stopping");
                break;
            }
        }
    }

    fn step(&mut self) -> Result<()> {
        match self.device.recv(TICK) {
            Ok(frame) => self.handle(frame.payload)?,
            Err(TransportError::Timeout) => {}
            Err(e) => return Err(e),
        }
        while let Some(frame) = self.device.try_recv() {
            self.handle(frame.payload)?;
        }

        let now = Instant::now();
        let dt = now.duration_since(self.last_tick).as_secs_f32();
        self.last_tick = now;

        let mut due = Vec::new();
        self.pending_acks.retain(|(at, token, code)| {
            if *at <= now {
                due.push((*token, *code));
                false
            } else {
                true
            }
        });
        for (token, code) in due {
            self.device
                .emit(self.id, Payload::CommandAck { token, code })?;
        }

        let mut outgoing = Vec::new();
        {
            let mut state = self.state.lock();
            state.advance(dt);

            if now >= self.next_heartbeat {
                self.next_heartbeat = now + Duration::from_millis(self.config.heartbeat_period_ms);
                if state.heartbeat {
                    outgoing.push(Payload::Heartbeat {
                        vehicle: self.config.vehicle,
                    });
                }
            }

            let mut kinds: Vec<SampleKind> = state.streams.keys().copied().collect();
            kinds.sort();
            for kind in kinds {
                let sample = state.sample(kind);
                if let Some(stream) = state.streams.get_mut(&kind) {
                    if now >= stream.next_due {
                        stream.next_due += stream.interval;
                        if stream.next_due < now {
                            stream.next_due = now + stream.interval;
                        }
                        outgoing.push(Payload::Sample(sample));
                    }
                }
            }

            if let Some(progress) = state.advance_mission(now, self.config.mission_step_ms) {
                outgoing.push(progress);
            }
        }
        for payload in outgoing {
            self.device.emit(self.id, payload)?;
        }
        Ok(())
    }

    fn handle(&mut self, payload: Payload) -> Result<()> {
        match payload {
            Payload::Command { token, command } => {
                let code = self.state.lock().apply(&command, &self.config);
                debug!(device = %self.id, token, command = command.name(), ?code, "sim command");
                if self.config.drop_acks {
                    return Ok(());
                }
                if self.config.ack_delay_ms == 0 {
                    self.device
                        .emit(self.id, Payload::CommandAck { token, code })?;
                } else {
                    let at = Instant::now() + Duration::from_millis(self.config.ack_delay_ms);
                    self.pending_acks.push((at, token, code));
                }
            }
            Payload::RequestVersion => {
                self.device
                    .emit(self.id, Payload::Version(version_info(self.id)))?;
            }
            _ => {}
        }
        Ok(())
    }
}

impl SimState {
    fn apply(&mut self, command: &Command, config: &SimConfig) -> AckCode {
        self.received.push(command.clone());
        if self.busy && !matches!(command, Command::SetMessageRate { .. }) {
            return AckCode::TemporarilyRejected;
        }
        match command {
            Command::Arm => {
                if !self.healthy {
                    return AckCode::Denied;
                }
                self.armed = true;
                AckCode::Accepted
            }
            Command::Disarm => {
                if self.in_air {
                    return AckCode::Denied;
                }
                self.armed = false;
                AckCode::Accepted
            }
            Command::Kill => {
                self.armed = false;
                self.in_air = false;
                self.altitude_m = 0.0;
                self.target_altitude_m = 0.0;
                self.mission.running = false;
                AckCode::Accepted
            }
            Command::Takeoff { altitude_m } => {
                if !self.armed {
                    return AckCode::Denied;
                }
                self.in_air = true;
                self.target_altitude_m = *altitude_m;
                AckCode::Accepted
            }
            Command::Land | Command::ReturnToLaunch => {
                if !self.in_air {
                    return AckCode::Denied;
                }
                self.mission.running = false;
                self.fixed_wing = false;
                self.target_altitude_m = 0.0;
                AckCode::Accepted
            }
            Command::TransitionToFixedwing | Command::TransitionToMulticopter => {
                if config.vehicle != VehicleKind::Vtol || !self.in_air {
                    return AckCode::Denied;
                }
                self.fixed_wing = matches!(command, Command::TransitionToFixedwing);
                AckCode::Accepted
            }
            Command::SetMessageRate { kind, hertz } => {
                if !hertz.is_finite() || *hertz < 0.0 || *hertz > config.max_rate_hz {
                    return AckCode::Denied;
                }
                match rate_interval(*hertz) {
                    Some(interval) => {
                        self.streams.insert(
                            *kind,
                            Stream {
                                interval,
                                next_due: Instant::now() + interval,
                            },
                        );
                    }
                    None => {
                        self.streams.remove(kind);
                    }
                }
                AckCode::Accepted
            }
            Command::MissionUpload { items } => {
                let total = match u32::try_from(items.len()) {
                    Ok(0) | Err(_) => return AckCode::Denied,
                    Ok(n) => n,
                };
                self.mission = Mission {
                    total,
                    altitude_m: items
                        .iter()
                        .map(|item| item.relative_altitude_m)
                        .fold(0.0, f32::max),
                    ..Mission::default()
                };
                AckCode::Accepted
            }
            Command::MissionStart => {
                if self.mission.total == 0 || !self.armed {
                    return AckCode::Denied;
                }
                if self.mission.current >= self.mission.total {
                    self.mission.current = 0;
                }
                self.mission.running = true;
                self.mission.next_step = None;
                self.in_air = true;
                self.target_altitude_m = self.mission.altitude_m;
                AckCode::Accepted
            }
            Command::MissionPause => {
                self.mission.running = false;
                AckCode::Accepted
            }
        }
    }

    fn advance(&mut self, dt: f32) {
        let step = CLIMB_RATE_M_S * dt;
        let delta = self.target_altitude_m - self.altitude_m;
        if delta.abs() <= step {
            self.altitude_m = self.target_altitude_m;
        } else {
            self.altitude_m += step * delta.signum();
        }
        if self.in_air && self.target_altitude_m <= 0.0 && self.altitude_m <= 0.0 {
            // Touchdown; the autopilot disarms on its own.
            self.in_air = false;
            self.armed = false;
        }
        if self.armed {
            self.battery_percent = (self.battery_percent - 0.05 * dt).max(0.0);
        }
    }

    fn advance_mission(&mut self, now: Instant, step_ms: u64) -> Option<Payload> {
        if !self.mission.running {
            return None;
        }
        let next = *self
            .mission
            .next_step
            .get_or_insert(now + Duration::from_millis(step_ms));
        if now < next {
            return None;
        }
        self.mission.current += 1;
        self.mission.next_step = Some(now + Duration::from_millis(step_ms));
        if self.mission.current >= self.mission.total {
            self.mission.running = false;
        }
        Some(Payload::MissionProgress {
            current: self.mission.current,
            total: self.mission.total,
        })
    }

    fn sample(&self, kind: SampleKind) -> TelemetrySample {
        match kind {
            SampleKind::Position => TelemetrySample::Position(Position {
                latitude_deg: HOME_LAT_DEG,
                longitude_deg: HOME_LON_DEG,
                absolute_altitude_m: HOME_ALT_M + self.altitude_m,
                relative_altitude_m: self.altitude_m,
            }),
            SampleKind::Health => TelemetrySample::Health(if self.healthy {
                Health::all_good()
            } else {
                Health {
                    global_position_ok: false,
                    home_position_ok: false,
                    ..Health::all_good()
                }
            }),
            SampleKind::Armed => TelemetrySample::Armed { armed: self.armed },
            SampleKind::InAir => TelemetrySample::InAir {
                in_air: self.in_air,
            },
            SampleKind::Battery => TelemetrySample::Battery(Battery {
                voltage_v: 10.5 + 2.1 * self.battery_percent / 100.0,
                remaining_percent: self.battery_percent,
            }),
        }
    }
}

fn version_info(id: DeviceId) -> VersionInfo {
    VersionInfo {
        uuid: id.raw(),
        version: Version {
            flight_sw_major: 1,
            flight_sw_minor: 8,
            flight_sw_patch: 0,
            flight_sw_git_hash: "0000000000000000".to_string(),
            os_sw_major: 7,
            os_sw_minor: 29,
            os_sw_patch: 0,
            os_sw_git_hash: "0000000000000000".to_string(),
        },
        product: Product {
            vendor_id: 0x26ac,
            vendor_name: "Simulated".to_string(),
            product_id: 0x0011,
            product_name: "sim-vehicle".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Endpoint, Frame, MockLink};

    fn command(link: &MockLink, token: u64, command: Command) -> anyhow::Result<()> {
        link.send(&Frame::new(DeviceId(1), Payload::Command { token, command }))?;
        Ok(())
    }

    fn ack_for(link: &MockLink, token: u64) -> anyhow::Result<AckCode> {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            match link.recv(Duration::from_millis(50)) {
                Ok(Frame {
                    payload: Payload::CommandAck { token: t, code },
                    ..
                }) if t == token => return Ok(code),
                Ok(_) | Err(TransportError::Timeout) => continue,
                Err(e) => return Err(e.into()),
            }
        }
        anyhow::bail!("no ack for token {token}")
    }

    #[test]
    fn emits_heartbeat_immediately() -> anyhow::Result<()> {
        let (link, device) = MockLink::pair("sim");
        let _sim = SimVehicle::spawn(device, DeviceId(9), SimConfig::default())?;
        let frame = link.recv(Duration::from_secs(1))?;
        assert_eq!(frame.device, DeviceId(9));
        assert!(matches!(frame.payload, Payload::Heartbeat { .. }));
        Ok(())
    }

    #[test]
    fn arming_follows_health() -> anyhow::Result<()> {
        let (link, device) = MockLink::pair("sim");
        let sim = SimVehicle::spawn(
            device,
            DeviceId(1),
            SimConfig {
                healthy: false,
                ..SimConfig::default()
            },
        )?;
        command(&link, 1, Command::Arm)?;
        assert_eq!(ack_for(&link, 1)?, AckCode::Denied);
        sim.set_healthy(true);
        command(&link, 2, Command::Arm)?;
        assert_eq!(ack_for(&link, 2)?, AckCode::Accepted);
        assert!(sim.armed());
        Ok(())
    }

    #[test]
    fn transitions_need_vtol_airframe() -> anyhow::Result<()> {
        let (link, device) = MockLink::pair("sim");
        let _sim = SimVehicle::spawn(device, DeviceId(1), SimConfig::default())?;
        command(&link, 1, Command::Arm)?;
        assert_eq!(ack_for(&link, 1)?, AckCode::Accepted);
        command(&link, 2, Command::Takeoff { altitude_m: 2.5 })?;
        assert_eq!(ack_for(&link, 2)?, AckCode::Accepted);
        command(&link, 3, Command::TransitionToFixedwing)?;
        assert_eq!(ack_for(&link, 3)?, AckCode::Denied);
        Ok(())
    }

    #[test]
    fn rejects_rates_above_maximum() -> anyhow::Result<()> {
        let (link, device) = MockLink::pair("sim");
        let _sim = SimVehicle::spawn(device, DeviceId(1), SimConfig::default())?;
        let kind = SampleKind::Position;
        command(&link, 1, Command::SetMessageRate { kind, hertz: 500.0 })?;
        assert_eq!(ack_for(&link, 1)?, AckCode::Denied);
        command(&link, 2, Command::SetMessageRate { kind, hertz: 10.0 })?;
        assert_eq!(ack_for(&link, 2)?, AckCode::Accepted);
        Ok(())
    }

    #[test]
    fn busy_vehicle_rejects_temporarily() -> anyhow::Result<()> {
        let (link, device) = MockLink::pair("sim");
        let sim = SimVehicle::spawn(device, DeviceId(1), SimConfig::default())?;
        sim.set_busy(true);
        command(&link, 1, Command::Arm)?;
        assert_eq!(ack_for(&link, 1)?, AckCode::TemporarilyRejected);
        assert_eq!(sim.received_commands(), vec![Command::Arm]);
        Ok(())
    }
}
