use crate::lifecycle::{HookError, Plugin, PluginImpl, PluginState};
use crate::Result;
use device_registry::{CallEveryCookie, DeviceHandle, HandlerId};
use link_transport::{Payload, PayloadKind, Product, Version, VersionInfo};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const REQUEST_INTERVAL: Duration = Duration::from_secs(1);

pub(crate) struct InfoImpl {
    device: DeviceHandle,
    received: Arc<Mutex<Option<VersionInfo>>>,
    handler: Option<HandlerId>,
    request_timer: Option<CallEveryCookie>,
}

fn request_version(device: &DeviceHandle) {
    if let Err(e) = device.send(Payload::RequestVersion) {
        debug!(device = %device.id(), error = %e, "version request not sent");
    }
}

impl PluginImpl for InfoImpl {
    const NAME: &'static str = "info";

    fn new(device: DeviceHandle) -> Self {
        Self {
            device,
            received: Arc::new(Mutex::new(None)),
            handler: None,
            request_timer: None,
        }
    }

    fn enable(&mut self) -> std::result::Result<(), HookError> {
        let received = Arc::clone(&self.received);
        let id = self.device.id();
        self.handler = Some(
            self.device
                .register_handler(PayloadKind::Version, move |payload| {
                    if let Payload::Version(version) = payload {
                        let mut slot = received.lock();
                        if slot.is_none() {
                            info!(device = %id, uuid = version.uuid, product = %version.product.product_name, "version received");
                        }
                        *slot = Some(version.clone());
                    }
                }),
        );

        request_version(&self.device);
        let device = self.device.clone();
        let received = Arc::clone(&self.received);
        self.request_timer = Some(self.device.timers().add(
            move || {
                if received.lock().is_none() {
                    request_version(&device);
                }
            },
            REQUEST_INTERVAL,
        ));
        Ok(())
    }

    fn disable(&mut self) -> std::result::Result<(), HookError> {
        if let Some(cookie) = self.request_timer.take() {
            self.device.timers().remove(cookie);
        }
        if let Some(id) = self.handler.take() {
            self.device.unregister_handler(id);
        }
        Ok(())
    }

    fn deinit(&mut self) -> std::result::Result<(), HookError> {
        *self.received.lock() = None;
        Ok(())
    }
}

/// Identification data of the vehicle: hardware UUID, software versions, product.
///
/// The data is requested when the plugin is enabled and again every second until the
/// device answered. Getters return `None` until then.
pub struct Info {
    plugin: Plugin<InfoImpl>,
}

impl Info {
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

    pub fn is_complete(&self) -> Result<bool> {
        self.plugin.with_enabled(|i| i.received.lock().is_some())
    }

    pub fn uuid(&self) -> Result<Option<u64>> {
        self.plugin
            .with_enabled(|i| i.received.lock().as_ref().map(|v| v.uuid))
    }

    pub fn version(&self) -> Result<Option<Version>> {
        self.plugin
            .with_enabled(|i| i.received.lock().as_ref().map(|v| v.version.clone()))
    }

    pub fn product(&self) -> Result<Option<Product>> {
        self.plugin
            .with_enabled(|i| i.received.lock().as_ref().map(|v| v.product.clone()))
    }
}
