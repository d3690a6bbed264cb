use core::fmt;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// 64-bit identifier of a device, stable for the lifetime of a discovery session.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct DeviceId(pub u64);

impl DeviceId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for DeviceId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Timestamp(#[serde(with = "time::serde::rfc3339")] pub OffsetDateTime);

impl Timestamp {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }
}

/// One decoded message travelling over a link, in either direction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub device: DeviceId,
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
}

impl Frame {
    pub fn new(device: DeviceId, payload: Payload) -> Self {
        Self {
            device,
            payload,
            timestamp: Some(Timestamp::now()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Liveness signal, sent by a device at roughly 1 Hz.
    Heartbeat { vehicle: VehicleKind },
    Sample(TelemetrySample),
    Command { token: u64, command: Command },
    CommandAck { token: u64, code: AckCode },
    MissionProgress { current: u32, total: u32 },
    RequestVersion,
    Version(VersionInfo),
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Heartbeat { .. } => PayloadKind::Heartbeat,
            Payload::Sample(sample) => PayloadKind::Sample(sample.kind()),
            Payload::Command { .. } => PayloadKind::Command,
            Payload::CommandAck { .. } => PayloadKind::CommandAck,
            Payload::MissionProgress { .. } => PayloadKind::MissionProgress,
            Payload::RequestVersion => PayloadKind::RequestVersion,
            Payload::Version(_) => PayloadKind::Version,
        }
    }
}

/// Routing key for inbound payloads; telemetry is split per sample kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PayloadKind {
    Heartbeat,
    Sample(SampleKind),
    Command,
    CommandAck,
    MissionProgress,
    RequestVersion,
    Version,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleKind {
    #[default]
    Unknown,
    Multicopter,
    FixedWing,
    Vtol,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Command {
    Arm,
    Disarm,
    Kill,
    Takeoff { altitude_m: f32 },
    Land,
    ReturnToLaunch,
    TransitionToFixedwing,
    TransitionToMulticopter,
    SetMessageRate { kind: SampleKind, hertz: f64 },
    MissionUpload { items: Vec<MissionItem> },
    MissionStart,
    MissionPause,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Arm => "arm",
            Command::Disarm => "disarm",
            Command::Kill => "kill",
            Command::Takeoff { .. } => "takeoff",
            Command::Land => "land",
            Command::ReturnToLaunch => "return_to_launch",
            Command::TransitionToFixedwing => "transition_to_fixedwing",
            Command::TransitionToMulticopter => "transition_to_multicopter",
            Command::SetMessageRate { .. } => "set_message_rate",
            Command::MissionUpload { .. } => "mission_upload",
            Command::MissionStart => "mission_start",
            Command::MissionPause => "mission_pause",
        }
    }
}

/// Device-side verdict on a command.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckCode {
    Accepted,
    /// Not terminal: the device is still working on the command.
    InProgress,
    TemporarilyRejected,
    Denied,
    Unsupported,
    Failed,
}

impl AckCode {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AckCode::InProgress)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleKind {
    Position,
    Health,
    Armed,
    InAir,
    Battery,
}

impl SampleKind {
    pub const ALL: [SampleKind; 5] = [
        SampleKind::Position,
        SampleKind::Health,
        SampleKind::Armed,
        SampleKind::InAir,
        SampleKind::Battery,
    ];
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetrySample {
    Position(Position),
    Health(Health),
    Armed { armed: bool },
    InAir { in_air: bool },
    Battery(Battery),
}

impl TelemetrySample {
    pub fn kind(&self) -> SampleKind {
        match self {
            TelemetrySample::Position(_) => SampleKind::Position,
            TelemetrySample::Health(_) => SampleKind::Health,
            TelemetrySample::Armed { .. } => SampleKind::Armed,
            TelemetrySample::InAir { .. } => SampleKind::InAir,
            TelemetrySample::Battery(_) => SampleKind::Battery,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub absolute_altitude_m: f32,
    pub relative_altitude_m: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub gyrometer_calibration_ok: bool,
    pub accelerometer_calibration_ok: bool,
    pub magnetometer_calibration_ok: bool,
    pub level_calibration_ok: bool,
    pub local_position_ok: bool,
    pub global_position_ok: bool,
    pub home_position_ok: bool,
}

impl Health {
    pub fn all_good() -> Self {
        Self {
            gyrometer_calibration_ok: true,
            accelerometer_calibration_ok: true,
            magnetometer_calibration_ok: true,
            level_calibration_ok: true,
            local_position_ok: true,
            global_position_ok: true,
            home_position_ok: true,
        }
    }

    pub fn all_ok(&self) -> bool {
        self.gyrometer_calibration_ok
            && self.accelerometer_calibration_ok
            && self.magnetometer_calibration_ok
            && self.level_calibration_ok
            && self.local_position_ok
            && self.global_position_ok
            && self.home_position_ok
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Battery {
    pub voltage_v: f32,
    pub remaining_percent: f32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraAction {
    #[default]
    None,
    TakePhoto,
    StartPhotoInterval,
    StopPhotoInterval,
    StartVideo,
    StopVideo,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MissionItem {
    pub latitude_deg: f64,
    pub longitude_deg: f64,
    pub relative_altitude_m: f32,
    pub speed_m_s: f32,
    pub is_fly_through: bool,
    pub gimbal_pitch_deg: f32,
    pub gimbal_yaw_deg: f32,
    #[serde(default)]
    pub camera_action: CameraAction,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub flight_sw_major: u32,
    pub flight_sw_minor: u32,
    pub flight_sw_patch: u32,
    pub flight_sw_git_hash: String,
    pub os_sw_major: u32,
    pub os_sw_minor: u32,
    pub os_sw_patch: u32,
    pub os_sw_git_hash: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub vendor_id: u16,
    pub vendor_name: String,
    pub product_id: u16,
    pub product_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub uuid: u64,
    pub version: Version,
    pub product: Product,
}
