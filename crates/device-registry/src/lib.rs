//! device-registry: discovery session, device handles and command correlation
//!
//! A [`Session`] feeds inbound frames from one or more endpoints into the
//! [`DeviceRegistry`], which turns liveness signals into discovery events and owns one
//! [`DeviceHandle`] per device identifier. Each handle routes inbound messages to the
//! handlers plugins register on it and serializes outbound commands through its
//! [`CommandChannel`].

mod error;
pub use error::{CallError, RegistryError, Result};

mod config;
pub use config::{load_config_file, SessionConfig};

mod metrics;
pub use metrics::{DeviceMetrics, MetricsHub};

mod call_every;
pub use call_every::{CallEvery, CallEveryCookie};

mod dispatch;
pub use dispatch::{HandlerId, MessageHandlers};

mod command;
pub use command::CommandChannel;

mod handle;
pub use handle::{DeviceHandle, DeviceSettings};

mod registry;
pub use registry::DeviceRegistry;

mod session;
pub use session::Session;
