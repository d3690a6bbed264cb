//! flight-plugins: capability plugins bound to one discovered vehicle
//!
//! Every plugin wraps an exclusively owned implementation in a [`Plugin`] that runs the
//! initialize/enable steps on construction and disable/deinitialize on shutdown or
//! drop. Operations outside the enabled window fail with [`PluginError::NotEnabled`].
//! Commands return a [`CommandResult`] instead of an error; [`CommandSequence`] lets the
//! caller decide which failures abort a flight and which are only recorded.

mod error;
pub use error::{CommandResult, PluginError, Result};

mod lifecycle;
pub use lifecycle::{HookError, LifecycleStage, Plugin, PluginImpl, PluginState};

mod telemetry;
pub use telemetry::Telemetry;

mod action;
pub use action::{Action, DEFAULT_TAKEOFF_ALTITUDE_M};

mod info;
pub use info::Info;

mod mission;
pub use mission::{Mission, MissionProgress};

mod sequence;
pub use sequence::{CommandSequence, CommandSequenceStep, OnFailure, SequenceReport, StepOutcome};

#[cfg(test)]
mod testing;
