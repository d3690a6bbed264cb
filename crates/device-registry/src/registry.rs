use crate::{CallEvery, DeviceHandle, DeviceMetrics, DeviceSettings, RegistryError, Result};
use link_transport::{DeviceId, Endpoint, VehicleKind};
use parking_lot::{Condvar, Mutex, ReentrantMutex};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

type DeviceCallback = Arc<dyn Fn(DeviceId) + Send + Sync>;

#[derive(Default)]
struct Devices {
    by_id: HashMap<DeviceId, DeviceHandle>,
    order: Vec<DeviceId>,
}

/// Turns liveness signals into discovery events and owns one [`DeviceHandle`] per
/// identifier for the lifetime of the session.
///
/// A handle becomes visible to other threads' [`get_device`](Self::get_device) calls
/// only after every discovery subscriber has been invoked for its identifier. The
/// subscribers themselves already find it.
pub struct DeviceRegistry {
    devices: Mutex<Devices>,
    discovered: Condvar,
    // Held across subscriber invocation; reentrant so subscribers may query the registry.
    // Carries the handle being announced.
    discovery_gate: ReentrantMutex<RefCell<Option<DeviceHandle>>>,
    on_discover: Mutex<Vec<DeviceCallback>>,
    on_timeout: Mutex<Vec<DeviceCallback>>,
    timed_out: Mutex<HashSet<DeviceId>>,
    timers: Arc<CallEvery>,
    settings: DeviceSettings,
    metrics: Option<DeviceMetrics>,
}

impl DeviceRegistry {
    pub fn new(
        timers: Arc<CallEvery>,
        settings: DeviceSettings,
        metrics: Option<DeviceMetrics>,
    ) -> Self {
        Self {
            devices: Mutex::new(Devices::default()),
            discovered: Condvar::new(),
            discovery_gate: ReentrantMutex::new(RefCell::new(None)),
            on_discover: Mutex::new(Vec::new()),
            on_timeout: Mutex::new(Vec::new()),
            timed_out: Mutex::new(HashSet::new()),
            timers,
            settings,
            metrics,
        }
    }

    /// Record a liveness signal. Returns `true` when `id` was seen for the first time.
    ///
    /// Discovery subscribers run on the calling (delivery) thread, so they must return
    /// quickly.
    pub fn on_liveness_signal(
        &self,
        id: DeviceId,
        vehicle: VehicleKind,
        link: &Arc<dyn Endpoint>,
    ) -> bool {
        if let Some(m) = &self.metrics {
            m.liveness_signals.inc();
        }
        if let Some(handle) = self.find(id) {
            handle.touch(vehicle);
            return false;
        }

        let gate = self.discovery_gate.lock();
        // Another endpoint may have announced the same device while we waited.
        if let Some(handle) = self.find(id) {
            handle.touch(vehicle);
            return false;
        }

        let handle = DeviceHandle::new(
            id,
            vehicle,
            Arc::clone(link),
            Arc::clone(&self.timers),
            self.settings,
            self.metrics.clone(),
        );
        info!(device = %id, link = link.name(), ?vehicle, "discovered device");

        *gate.borrow_mut() = Some(handle.clone());
        let subscribers = self.on_discover.lock().clone();
        for subscriber in subscribers {
            subscriber(id);
        }
        gate.borrow_mut().take();

        let count = {
            let mut devices = self.devices.lock();
            devices.by_id.insert(id, handle);
            devices.order.push(id);
            devices.order.len()
        };
        if let Some(m) = &self.metrics {
            m.devices_discovered.set(count as i64);
        }
        self.discovered.notify_all();
        true
    }

    /// Subscribers are kept for the registry's lifetime and invoked once per new
    /// identifier, in registration order.
    pub fn register_discovery_subscriber<F>(&self, callback: F)
    where
        F: Fn(DeviceId) + Send + Sync + 'static,
    {
        self.on_discover.lock().push(Arc::new(callback));
    }

    /// Invoked once each time a device stops sending liveness signals for longer than
    /// the liveness timeout. The device's handle stays valid.
    pub fn register_timeout_subscriber<F>(&self, callback: F)
    where
        F: Fn(DeviceId) + Send + Sync + 'static,
    {
        self.on_timeout.lock().push(Arc::new(callback));
    }

    /// Look up a device. Without an identifier, succeeds only if exactly one device
    /// has been discovered.
    pub fn get_device(&self, id: Option<DeviceId>) -> Result<DeviceHandle> {
        let gate = self.discovery_gate.lock();
        // Only set while this thread is running discovery subscribers.
        let announcing = gate.borrow().clone();
        let devices = self.devices.lock();
        let lookup = |id: DeviceId| {
            devices
                .by_id
                .get(&id)
                .cloned()
                .or_else(|| announcing.clone().filter(|h| h.id() == id))
                .ok_or(RegistryError::UnknownDevice(id))
        };
        match id {
            Some(id) => lookup(id),
            None => {
                let mut ids = devices.order.clone();
                ids.extend(announcing.as_ref().map(DeviceHandle::id));
                match ids.as_slice() {
                    [] => Err(RegistryError::NoDevice(Duration::ZERO)),
                    [only] => lookup(*only),
                    many => Err(RegistryError::AmbiguousDevice(many.len())),
                }
            }
        }
    }

    /// Block until at least one device is discovered and return the first one.
    pub fn wait_for_device(&self, timeout: Duration) -> Result<DeviceHandle> {
        let deadline = Instant::now() + timeout;
        let mut devices = self.devices.lock();
        loop {
            if let Some(handle) = devices.order.first().and_then(|id| devices.by_id.get(id)) {
                return Ok(handle.clone());
            }
            if self
                .discovered
                .wait_until(&mut devices, deadline)
                .timed_out()
            {
                return Err(RegistryError::NoDevice(timeout));
            }
        }
    }

    /// Identifiers in discovery order.
    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.lock().order.clone()
    }

    pub fn len(&self) -> usize {
        self.devices.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_timed_out(&self, id: DeviceId) -> bool {
        self.timed_out.lock().contains(&id)
    }

    pub(crate) fn find(&self, id: DeviceId) -> Option<DeviceHandle> {
        self.devices.lock().by_id.get(&id).cloned()
    }

    /// Compare every device against the liveness timeout; fires timeout subscribers for
    /// devices that just went quiet and returns their identifiers.
    pub fn check_liveness(&self) -> Vec<DeviceId> {
        let handles: Vec<DeviceHandle> = self.devices.lock().by_id.values().cloned().collect();
        let mut newly_stale = Vec::new();
        {
            let mut timed_out = self.timed_out.lock();
            for handle in handles {
                let id = handle.id();
                if handle.is_stale() {
                    if timed_out.insert(id) {
                        warn!(device = %id, silent_for = ?handle.since_last_liveness(), "device timed out");
                        newly_stale.push(id);
                    }
                } else if timed_out.remove(&id) {
                    info!(device = %id, "device liveness recovered");
                }
            }
        }
        if !newly_stale.is_empty() {
            let subscribers = self.on_timeout.lock().clone();
            for id in &newly_stale {
                for subscriber in &subscribers {
                    subscriber(*id);
                }
            }
        }
        newly_stale
    }
}
