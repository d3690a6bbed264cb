use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Session-wide timing knobs. Every field has a default, so a YAML file only needs
/// the values it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Per-attempt wait for a command acknowledgement.
    pub command_timeout_ms: u64,
    /// Resends of an unacknowledged command before reporting a timeout.
    pub command_retries: u32,
    /// Overall limit for one command, however often the device reports progress.
    pub command_progress_timeout_ms: u64,
    /// A device with no liveness signal for this long is considered timed out.
    pub liveness_timeout_ms: u64,
    pub liveness_check_ms: u64,
    /// Default wait used by callers that block on first discovery.
    pub discovery_timeout_ms: u64,
    pub recv_poll_ms: u64,
    pub timer_tick_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 1000,
            command_retries: 2,
            command_progress_timeout_ms: 10_000,
            liveness_timeout_ms: 3000,
            liveness_check_ms: 500,
            discovery_timeout_ms: 2000,
            recv_poll_ms: 20,
            timer_tick_ms: 10,
        }
    }
}

impl SessionConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn command_progress_timeout(&self) -> Duration {
        Duration::from_millis(self.command_progress_timeout_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn liveness_check(&self) -> Duration {
        Duration::from_millis(self.liveness_check_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn recv_poll(&self) -> Duration {
        Duration::from_millis(self.recv_poll_ms.max(1))
    }

    pub fn timer_tick(&self) -> Duration {
        Duration::from_millis(self.timer_tick_ms.max(1))
    }
}

pub fn load_config_file(path: impl AsRef<Path>) -> anyhow::Result<SessionConfig> {
    let path = path.as_ref();
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading config: {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(SessionConfig::default());
    }
    let config: SessionConfig =
        serde_yaml::from_str(&raw).with_context(|| format!("parsing yaml: {}", path.display()))?;
    Ok(config)
}
