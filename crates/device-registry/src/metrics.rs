use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct DeviceMetrics {
    pub liveness_signals: IntCounter,
    pub frames_received: IntCounter,
    pub devices_discovered: IntGauge,
    pub commands_sent: IntCounter,
    pub command_timeouts: IntCounter,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub dev: DeviceMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let init = |e: prometheus::Error| format!("metrics init error: {e}");
        let registry = Registry::new();
        let liveness_signals =
            IntCounter::new("fl_liveness_signals", "Total liveness signals received")
                .map_err(init)?;
        let frames_received =
            IntCounter::new("fl_frames_received", "Total inbound frames").map_err(init)?;
        let devices_discovered =
            IntGauge::new("fl_devices_discovered", "Number of devices discovered this session")
                .map_err(init)?;
        let commands_sent =
            IntCounter::new("fl_commands_sent", "Command transmissions, retries included")
                .map_err(init)?;
        let command_timeouts = IntCounter::new(
            "fl_command_timeouts",
            "Commands that ended without a terminal acknowledgement",
        )
        .map_err(init)?;
        let dev = DeviceMetrics {
            liveness_signals,
            frames_received,
            devices_discovered,
            commands_sent,
            command_timeouts,
        };
        let _ = registry.register(Box::new(dev.liveness_signals.clone()));
        let _ = registry.register(Box::new(dev.frames_received.clone()));
        let _ = registry.register(Box::new(dev.devices_discovered.clone()));
        let _ = registry.register(Box::new(dev.commands_sent.clone()));
        let _ = registry.register(Box::new(dev.command_timeouts.clone()));
        Ok(Self { registry, dev })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
