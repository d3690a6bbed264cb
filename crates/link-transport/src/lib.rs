//! link-transport: endpoint abstractions and the decoded message model for vehicle links
//!
//! This crate provides the [`Endpoint`] trait through which inbound liveness signals,
//! telemetry samples and command acknowledgements arrive, and through which commands
//! leave. Backends are feature-gated: `udp` for real links, `mock` for an in-process
//! pair, and `sim` for a simulated vehicle on top of the mock pair so that binaries
//! and tests run on any host.

mod types;
pub use types::{
    AckCode, Battery, CameraAction, Command, DeviceId, Frame, Health, MissionItem, Payload,
    PayloadKind, Position, Product, SampleKind, TelemetrySample, Timestamp, VehicleKind, Version,
    VersionInfo,
};

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::Endpoint;

mod connection;
pub use connection::{open, open_spec, TransportSpec, DEFAULT_UDP_PORT};

#[cfg(feature = "udp")]
mod udp;
#[cfg(feature = "udp")]
pub use udp::UdpLink;

#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "mock")]
pub use mock::{MockDevice, MockLink};

#[cfg(feature = "sim")]
mod sim;
#[cfg(feature = "sim")]
pub use sim::{SimConfig, SimVehicle};
